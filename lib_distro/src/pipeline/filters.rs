//! # Event Filters
//!
//! Filters decide whether an event continues down a registration's pipeline
//! and may narrow its content. Events arrive shared (`Arc<Event>`), so the
//! device filter passes the same allocation through untouched while the
//! value-descriptor filter allocates a new, narrowed event.

use std::collections::HashSet;
use std::sync::Arc;

use crate::models::{Event, RegistrationFilter};

/// A pipeline filter stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Accepts events whose `device` is in the allow-list.
    DeviceId(HashSet<String>),
    /// Accepts events with at least one reading whose `name` is in the
    /// allow-list and keeps only those readings.
    ValueDescriptor(HashSet<String>),
}

impl EventFilter {
    pub fn device_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter::DeviceId(ids.into_iter().map(Into::into).collect())
    }

    pub fn value_descriptors<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter::ValueDescriptor(ids.into_iter().map(Into::into).collect())
    }

    /// Builds the filter chain of a registration.
    ///
    /// The order is fixed: device filter first, then value-descriptor
    /// filter, each present only when its id list is non-empty.
    pub fn chain(filter: &RegistrationFilter) -> Vec<EventFilter> {
        let mut chain = Vec::with_capacity(2);
        if !filter.device_ids.is_empty() {
            log::debug!("Device ID filter added: {:?}", filter.device_ids);
            chain.push(EventFilter::device_ids(filter.device_ids.iter().cloned()));
        }
        if !filter.value_descriptor_ids.is_empty() {
            log::debug!(
                "Value descriptor filter added: {:?}",
                filter.value_descriptor_ids
            );
            chain.push(EventFilter::value_descriptors(
                filter.value_descriptor_ids.iter().cloned(),
            ));
        }
        chain
    }

    /// Applies the filter. Returns whether the event was accepted together
    /// with the event the next stage should see.
    pub fn filter(&self, event: Option<Arc<Event>>) -> (bool, Option<Arc<Event>>) {
        let Some(event) = event else {
            return (false, None);
        };

        match self {
            EventFilter::DeviceId(allowed) => {
                let accepted = allowed.contains(&event.device);
                (accepted, Some(event))
            }
            EventFilter::ValueDescriptor(allowed) => {
                let narrowed = event.with_readings_where(|r| allowed.contains(&r.name));
                if narrowed.readings.is_empty() {
                    (false, Some(event))
                } else {
                    (true, Some(Arc::new(narrowed)))
                }
            }
        }
    }
}
