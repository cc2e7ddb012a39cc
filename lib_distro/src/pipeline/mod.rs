//! # Export Pipeline
//!
//! The resolved stage instances of one registration:
//! filters -> formatter -> compressor -> encryptor -> sender.
//!
//! A `Pipeline` is built from a `Registration` in one step and is either
//! complete or not built at all. Reloading a registration builds a new
//! pipeline and swaps it in whole.

use std::sync::Arc;
use thiserror::Error;

use crate::models::{Event, Format, Registration, RegistrationError};

/// Filter stages.
pub mod filters;
/// Event encoders.
pub mod formatters;
/// Transport senders and their factory.
pub mod senders;
/// Compression and encryption stages.
pub mod transformers;

pub use filters::EventFilter;
pub use formatters::{FormatError, Formatter};
pub use senders::{SendError, Sender, SenderFactory, TransportSenderFactory};
pub use transformers::{AesEncryptor, Compressor};

/// Why an accepted event was not delivered.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("format {0} has no encoder")]
    NoFormatter(Format),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),

    #[error(transparent)]
    Send(#[from] SendError),
}

/// Result of running one event through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A filter rejected the event.
    Filtered,
    /// The payload reached the sender.
    Sent,
}

pub struct Pipeline {
    filters: Vec<EventFilter>,
    format: Format,
    formatter: Option<Formatter>,
    compressor: Option<Compressor>,
    encryptor: Option<AesEncryptor>,
    sender: Box<dyn Sender>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("filters", &self.filters)
            .field("format", &self.format)
            .field("compressor", &self.compressor)
            .field("encrypted", &self.encryptor.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validates `registration` and resolves every stage.
    ///
    /// The sender is built last, only after every other field parsed.
    pub async fn build(
        registration: &Registration,
        senders: &dyn SenderFactory,
    ) -> Result<Self, RegistrationError> {
        let mut registration = registration.clone();
        registration.validate()?;
        let kinds = registration.kinds()?;

        let formatter = Formatter::for_format(kinds.format);
        if formatter.is_none() {
            log::warn!(
                "Registration '{}' uses format {} which has no encoder; its events will be dropped",
                registration.name,
                kinds.format
            );
        }
        let filters = EventFilter::chain(&registration.filter);
        let compressor = Compressor::for_kind(kinds.compression);
        let encryptor = AesEncryptor::for_details(&registration.encryption, kinds.encryption);

        let sender = senders
            .build(kinds.destination, &registration.addressable)
            .await?;

        Ok(Self {
            filters,
            format: kinds.format,
            formatter,
            compressor,
            encryptor,
            sender,
        })
    }

    /// Runs `event` through every stage. The first rejecting filter ends
    /// processing.
    pub async fn process(&mut self, event: Arc<Event>) -> Result<Delivery, PipelineError> {
        let mut current = Some(event);
        for filter in &self.filters {
            let (accepted, next) = filter.filter(current);
            if !accepted {
                return Ok(Delivery::Filtered);
            }
            current = next;
        }
        let Some(event) = current else {
            return Ok(Delivery::Filtered);
        };

        let formatter = self
            .formatter
            .ok_or(PipelineError::NoFormatter(self.format))?;
        let mut payload = formatter.format(&event)?;
        if let Some(compressor) = &self.compressor {
            payload = compressor.transform(&payload)?;
        }
        if let Some(encryptor) = &self.encryptor {
            payload = encryptor.transform(&payload);
        }

        self.sender.send(&payload, &event).await?;
        Ok(Delivery::Sent)
    }
}
