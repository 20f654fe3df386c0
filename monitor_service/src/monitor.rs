// monitor_service/src/monitor.rs
use crate::error::MonitorError;
use crate::metrics::MonitorMetrics;
use crate::task::{MonitorContext, MonitorTask};
use crate::tasks::{
    CheckForProofs, CheckNoSends, Clock, FailAbandoned, NewHeader, Purge, ReviewStatus,
    SendWaiting,
};
use async_channel::{unbounded, Sender};
use network_service::{BlockHeader, Services};
use shared::{now, MonitorConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use storage_service::{MonitorEvent, WalletStorage};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

pub const ERROR_EVENT: &str = "MonitorError";

/// Owns the task list and runs it: one cycle evaluates every trigger, then
/// runs the due tasks in list order, strictly one at a time.
pub struct Monitor {
    ctx: MonitorContext,
    header_sender: Sender<BlockHeader>,
    tasks: Mutex<Vec<Box<dyn MonitorTask>>>,
    running: AtomicBool,
    stop: Notify,
    metrics: MonitorMetrics,
}

impl Monitor {
    pub fn new(
        storage: Arc<dyn WalletStorage>,
        services: Arc<Services>,
        config: MonitorConfig,
    ) -> Result<Self, MonitorError> {
        let (header_sender, headers) = unbounded();
        let ctx = MonitorContext {
            storage,
            services,
            config: Arc::new(config),
            check_now: Arc::new(AtomicBool::new(false)),
            last_header: Arc::new(StdMutex::new(None)),
            headers,
        };
        Ok(Self {
            ctx,
            header_sender,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stop: Notify::new(),
            metrics: MonitorMetrics::new()?,
        })
    }

    /// Context handed to tasks built outside the monitor.
    pub fn context(&self) -> MonitorContext {
        self.ctx.clone()
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn add_task(&self, task: Box<dyn MonitorTask>) -> Result<(), MonitorError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.iter().any(|t| t.name() == task.name()) {
            return Err(MonitorError::DuplicateTask(task.name().to_string()));
        }
        tasks.push(task);
        Ok(())
    }

    pub async fn remove_task(&self, name: &str) -> Result<(), MonitorError> {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|t| t.name() != name);
        if tasks.len() == before {
            return Err(MonitorError::UnknownTask(name.to_string()));
        }
        Ok(())
    }

    pub async fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Adds the standard task set.
    pub async fn add_default_tasks(&self) -> Result<(), MonitorError> {
        let ctx = self.context();
        let settings = &ctx.config.monitor;
        self.add_task(Box::new(Clock::new(settings.clock_msecs))).await?;
        self.add_task(Box::new(NewHeader::new(ctx.clone()))).await?;
        self.add_task(Box::new(SendWaiting::new(ctx.clone()))).await?;
        self.add_task(Box::new(CheckForProofs::new(ctx.clone()))).await?;
        self.add_task(Box::new(CheckNoSends::new(ctx.clone()))).await?;
        self.add_task(Box::new(FailAbandoned::new(ctx.clone()))).await?;
        self.add_task(Box::new(ReviewStatus::new(ctx.clone()))).await?;
        self.add_task(Box::new(Purge::new(ctx.clone()))).await?;
        Ok(())
    }

    /// Queues a header for the NewHeader task, which decides whether the
    /// tip moved.
    pub async fn process_new_block_header(&self, header: BlockHeader) {
        info!("Received block header {} at height {}", header.hash, header.height);
        if let Err(e) = self.header_sender.send(header).await {
            warn!("Dropped block header: {}", e);
        }
    }

    async fn log_event(&self, event: &str, details: String) {
        let record = MonitorEvent::new(event, Some(details), now());
        if let Err(e) = self.ctx.storage.insert_monitor_event(&record).await {
            error!("Failed to persist monitor event {}: {}", event, e);
        }
    }

    async fn log_error(&self, task: &str, phase: &str, e: &MonitorError) {
        self.metrics.task_errors.inc();
        error!("Task {} {} failed: {}", task, phase, e);
        self.log_event(ERROR_EVENT, format!("{} {}: {}", task, phase, e))
            .await;
    }

    /// One scheduler cycle. Task errors are persisted as events and do not
    /// stop the cycle. Returns the names of the tasks that ran.
    pub async fn run_once(&self, run_setup: bool) -> Result<Vec<String>, MonitorError> {
        self.cycle(run_setup, false).await
    }

    async fn cycle(&self, run_setup: bool, cooperative: bool) -> Result<Vec<String>, MonitorError> {
        let started = Instant::now();
        let mut tasks = self.tasks.lock().await;

        if run_setup {
            for task in tasks.iter_mut() {
                if let Err(e) = task.setup().await {
                    let name = task.name().to_string();
                    self.log_error(&name, "setup", &e).await;
                }
            }
        }

        let now = now();
        let mut due = Vec::new();
        for (i, task) in tasks.iter_mut().enumerate() {
            match task.trigger(now).await {
                Ok(true) => due.push(i),
                Ok(false) => {}
                Err(e) => {
                    let name = task.name().to_string();
                    self.log_error(&name, "trigger", &e).await;
                }
            }
        }

        let mut ran = Vec::new();
        for i in due {
            if cooperative && !self.is_running() {
                info!("Monitor stopping mid-cycle");
                break;
            }
            let task = &mut tasks[i];
            let name = task.name().to_string();
            self.metrics.task_runs.inc();
            match task.run(now).await {
                Ok(log) => {
                    if !log.is_empty() {
                        self.log_event(&name, log).await;
                    }
                }
                Err(e) => self.log_error(&name, "run", &e).await,
            }
            ran.push(name);
        }

        self.metrics
            .cycle_latency_ms
            .set(started.elapsed().as_millis() as f64);
        Ok(ran)
    }

    /// Runs one task now, regardless of its trigger. A failure is persisted
    /// like one from a cycle, then returned.
    pub async fn run_task(&self, name: &str) -> Result<String, MonitorError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| MonitorError::UnknownTask(name.to_string()))?;
        self.metrics.task_runs.inc();
        let log = match task.run(now()).await {
            Ok(log) => log,
            Err(e) => {
                self.log_error(name, "run", &e).await;
                return Err(e);
            }
        };
        if !log.is_empty() {
            self.log_event(name, log.clone()).await;
        }
        Ok(log)
    }

    /// Runs cycles until `stop_tasks`, waiting `monitor.task_run_wait_msecs`
    /// between them. Setup runs before the first cycle.
    pub async fn start_tasks(&self) -> Result<(), MonitorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitorError::AlreadyRunning);
        }
        let wait = Duration::from_millis(self.ctx.config.monitor.task_run_wait_msecs);
        info!("Monitor started with {} tasks", self.tasks.lock().await.len());

        let mut run_setup = true;
        while self.is_running() {
            if let Err(e) = self.cycle(run_setup, true).await {
                self.log_error("Monitor", "cycle", &e).await;
            }
            run_setup = false;
            if !self.is_running() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.stop.notified() => {}
            }
        }
        info!("Monitor stopped");
        Ok(())
    }

    /// Asks a running monitor to stop. The current task finishes; no new one
    /// starts.
    pub fn stop_tasks(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }
}
