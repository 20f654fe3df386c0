// monitor_service/src/tasks/new_header.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use network_service::BlockHeader;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Watches the chain tip, both by polling the chain tracker and by draining
/// headers pushed through `Monitor::process_new_block_header`. A higher tip,
/// or a different hash at the same height, sets `check_now`.
pub struct NewHeader {
    ctx: MonitorContext,
    interval: Interval,
}

impl NewHeader {
    pub const NAME: &'static str = "NewHeader";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.new_header_msecs);
        Self { ctx, interval }
    }

    async fn poll_tip(&self) -> Option<BlockHeader> {
        let tracker = self.ctx.services.chain_tracker()?;
        let height = match tracker.current_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!("Chain tracker height unavailable: {}", e);
                return None;
            }
        };
        match tracker.find_header_for_height(height).await {
            Ok(header) => header,
            Err(e) => {
                warn!("Chain tracker header {} unavailable: {}", height, e);
                None
            }
        }
    }

    /// Records `header` as the tip if it moves the chain. Returns true
    /// when it did.
    fn observe(&self, header: BlockHeader) -> bool {
        let changed = match self.ctx.last_header() {
            None => true,
            Some(last) => {
                header.height > last.height
                    || (header.height == last.height && header.hash != last.hash)
            }
        };
        if changed {
            self.ctx.set_last_header(header);
        }
        changed
    }
}

#[async_trait]
impl MonitorTask for NewHeader {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        if !self.ctx.headers.is_empty() {
            return Ok(true);
        }
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, _now: DateTime<Utc>) -> Result<String, MonitorError> {
        let mut candidates = Vec::new();
        while let Ok(header) = self.ctx.headers.try_recv() {
            candidates.push(header);
        }
        if let Some(tip) = self.poll_tip().await {
            candidates.push(tip);
        }

        let mut log = String::new();
        for header in candidates {
            let (height, hash) = (header.height, header.hash.clone());
            if self.observe(header) {
                self.ctx.check_now.store(true, Ordering::SeqCst);
                info!("New block header {} at height {}", hash, height);
                log.push_str(&format!("new header {} at height {}\n", hash, height));
            }
        }
        Ok(log)
    }
}
