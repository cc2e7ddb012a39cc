//! The collaborators shared by the coordinator and every actor.

use std::sync::Arc;

use crate::configs::DistroSettings;
use crate::pipeline::{SenderFactory, TransportSenderFactory};
use crate::retrieve::{HttpPushMarker, PushMarker};

/// Engine context. Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct DistroContext {
    pub settings: Arc<DistroSettings>,
    pub senders: Arc<dyn SenderFactory>,
    /// Present when delivered events are to be marked as pushed.
    pub push_marker: Option<Arc<dyn PushMarker>>,
}

impl DistroContext {
    pub fn new(settings: DistroSettings, senders: Arc<dyn SenderFactory>) -> Self {
        Self {
            settings: Arc::new(settings),
            senders,
            push_marker: None,
        }
    }

    pub fn with_push_marker(mut self, marker: Arc<dyn PushMarker>) -> Self {
        self.push_marker = Some(marker);
        self
    }

    /// Production wiring: network senders, plus the core-data push marker
    /// when `mark_pushed` is set.
    pub fn from_settings(settings: DistroSettings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let push_marker = if settings.mark_pushed {
            let marker = HttpPushMarker::new(&settings.data_host, settings.client_max_retries)?;
            Some(Arc::new(marker) as Arc<dyn PushMarker>)
        } else {
            None
        };
        Ok(Self {
            senders: Arc::new(TransportSenderFactory::new(Arc::clone(&settings))),
            settings,
            push_marker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_marker_follows_settings() {
        let ctx = DistroContext::from_settings(DistroSettings::default()).unwrap();
        assert!(ctx.push_marker.is_none());

        let marking = DistroSettings {
            mark_pushed: true,
            ..Default::default()
        };
        assert!(DistroContext::from_settings(marking).unwrap().push_marker.is_some());

        let broken = DistroSettings {
            mark_pushed: true,
            data_host: "no scheme".into(),
            ..Default::default()
        };
        assert!(DistroContext::from_settings(broken).is_err());
    }
}
