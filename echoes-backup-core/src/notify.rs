//! Best-effort failure alerts.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::contract::Notifier;
use crate::error::NotifyError;

/// Forwards every message to all configured channels. A failing channel is
/// logged and never reported to the caller.
#[derive(Clone, Default)]
pub struct FanOutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanOutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }
}

#[async_trait]
impl Notifier for FanOutNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        if self.notifiers.is_empty() {
            debug!("No notification channels configured");
            return Ok(());
        }
        let results = join_all(self.notifiers.iter().map(|n| n.notify(message))).await;
        for e in results.into_iter().filter_map(Result::err) {
            warn!(channel = e.channel, error = %e.message, "Notification failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockNotifier;

    #[tokio::test]
    async fn a_failing_channel_does_not_stop_the_others() {
        let mut failing = MockNotifier::new();
        failing.expect_notify().times(1).returning(|_| {
            Err(NotifyError {
                channel: "slack",
                message: "invalid_auth".into(),
            })
        });
        let mut working = MockNotifier::new();
        working
            .expect_notify()
            .withf(|m| m == "boom")
            .times(1)
            .returning(|_| Ok(()));

        let fan_out = FanOutNotifier::new(vec![Arc::new(failing), Arc::new(working)]);
        assert_eq!(fan_out.len(), 2);
        assert!(fan_out.notify("boom").await.is_ok());
    }

    #[tokio::test]
    async fn empty_fan_out_is_a_no_op() {
        let fan_out = FanOutNotifier::default();
        assert!(fan_out.is_empty());
        assert!(fan_out.notify("ignored").await.is_ok());
    }
}
