//! Background auto-upload scheduler.
//!
//! A tokio task ticks at a fixed cadence (one second by default) and runs a
//! batch pass whenever the configured interval has elapsed since the last
//! one. Nothing about in-flight work survives a restart; the next pass simply
//! rescans the drop directory.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::AutoUploadConfig;
use crate::pipeline::{BatchReport, PollPolicy, UploadPipeline};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_processed: usize,
    pub last_unprocessed: usize,
}

impl SchedulerStatus {
    pub fn label(&self) -> &'static str {
        if self.running {
            "Running"
        } else {
            "Not running"
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

pub struct Scheduler {
    pipeline: UploadPipeline,
    interval: Duration,
    tick: Duration,
    poll: PollPolicy,
    status: Arc<Mutex<SchedulerStatus>>,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(pipeline: UploadPipeline, interval: Duration, tick: Duration, poll: PollPolicy) -> Self {
        let status = SchedulerStatus {
            interval_secs: interval.as_secs(),
            ..Default::default()
        };
        Self {
            pipeline,
            interval,
            tick,
            poll,
            status: Arc::new(Mutex::new(status)),
            worker: Mutex::new(None),
        }
    }

    pub fn from_config(pipeline: UploadPipeline, config: &AutoUploadConfig) -> Self {
        Self::new(
            pipeline,
            config.interval(),
            config.tick(),
            PollPolicy::scheduled(config),
        )
    }

    pub fn status(&self) -> SchedulerStatus {
        lock(&self.status).clone()
    }

    pub fn is_running(&self) -> bool {
        let worker = lock(&self.worker);
        worker.as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawn the polling loop. Returns `false` when it is already running.
    ///
    /// The first pass runs one full interval after start.
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.pipeline.clone(),
            self.interval,
            self.tick,
            self.poll,
            self.status.clone(),
            rx,
        ));
        *worker = Some(Worker { handle, shutdown });
        lock(&self.status).running = true;
        tracing::info!(interval_secs = self.interval.as_secs(), "scheduler started");
        true
    }

    /// Signal the loop to exit and wait for it. A pass in progress finishes
    /// first.
    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            if let Err(e) = worker.handle.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        lock(&self.status).running = false;
    }

    /// Run the loop on the current task until ctrl-c.
    pub async fn run_until_ctrl_c(&self) -> anyhow::Result<()> {
        self.start();
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down scheduler");
        self.stop().await;
        Ok(())
    }
}

async fn run_loop(
    pipeline: UploadPipeline,
    interval: Duration,
    tick: Duration,
    poll: PollPolicy,
    status: Arc<Mutex<SchedulerStatus>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut next_run = Instant::now() + interval;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if Instant::now() < next_run {
            continue;
        }

        let report = pipeline.run_batch(poll).await;
        record_run(&status, &report);
        next_run = Instant::now() + interval;
    }

    lock(&status).running = false;
    tracing::info!("scheduler stopped");
}

fn record_run(status: &Mutex<SchedulerStatus>, report: &BatchReport) {
    let mut s = lock(status);
    s.runs += 1;
    s.last_run_at = Some(Utc::now());
    s.last_processed = report.processed_files.len();
    s.last_unprocessed = report.unprocessed_files.len();
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
