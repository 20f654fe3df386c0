// monitor_service/src/tasks/clock.rs
use crate::error::MonitorError;
use crate::task::MonitorTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::epoch_msecs;
use tracing::debug;

/// Heartbeat. Fires each time the clock crosses into a new period of
/// `msecs` and logs the period start.
pub struct Clock {
    msecs: i64,
    next_msecs: i64,
}

impl Clock {
    pub const NAME: &'static str = "Clock";

    pub fn new(msecs: i64) -> Self {
        Self {
            msecs: msecs.max(1),
            next_msecs: 0,
        }
    }

    fn period_start(&self, now_msecs: i64) -> i64 {
        now_msecs - now_msecs.rem_euclid(self.msecs)
    }
}

#[async_trait]
impl MonitorTask for Clock {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn setup(&mut self) -> Result<(), MonitorError> {
        self.next_msecs = 0;
        Ok(())
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        Ok(epoch_msecs(now) >= self.next_msecs)
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let start = self.period_start(epoch_msecs(now));
        self.next_msecs = start + self.msecs;
        let tick = DateTime::<Utc>::from_timestamp_millis(start).unwrap_or(now);
        debug!("Clock tick {}", tick);
        Ok(tick.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn ticks_once_per_period() {
        let mut clock = Clock::new(60_000);
        let now = Utc::now();
        assert!(clock.trigger(now).await.unwrap());
        clock.run(now).await.unwrap();
        assert!(!clock.trigger(now).await.unwrap());
        assert!(clock.trigger(now + Duration::seconds(60)).await.unwrap());
    }
}
