//! Built-in dead-letter handler.

use std::time::Duration;

use crate::domain::DeadLetterAction;
use crate::ports::{DeadLetter, DeadLetterHandler};

/// Catch-all handler that runs last: alert on heavy retry use or long outages, otherwise keep the row.
#[derive(Debug, Clone, Copy)]
pub struct DefaultDeadLetterHandler {
    alert_retry_count: u32,
    alert_after: Duration,
}

impl DefaultDeadLetterHandler {
    pub const NAME: &'static str = "default";

    pub fn new(alert_retry_count: u32, alert_after: Duration) -> Self {
        Self {
            alert_retry_count,
            alert_after,
        }
    }
}

impl Default for DefaultDeadLetterHandler {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3600))
    }
}

impl DeadLetterHandler for DefaultDeadLetterHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    fn decide(&self, letter: &DeadLetter) -> DeadLetterAction {
        if letter.retry_count() >= self.alert_retry_count {
            DeadLetterAction::SendAlert
        } else if letter.failure_duration() > self.alert_after {
            DeadLetterAction::SendAlert
        } else {
            DeadLetterAction::StoreToDatabase
        }
    }
}
