//! Periodic job runner.
//!
//! Each registered job gets its own loop ticking at its interval. A slow
//! run delays that job's next tick instead of stacking up; overlap with a
//! run started elsewhere (an API trigger, a second process) is prevented
//! by the job's own run-lock.

mod jobs;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::metrics;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the periodic jobs at all (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_staging_interval")]
    pub staging_interval_secs: u64,

    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Run-lock markers older than this are treated as left by a crashed run.
    #[serde(default = "default_stale_lock")]
    pub stale_lock_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_scan_interval() -> u64 {
    300
}

fn default_staging_interval() -> u64 {
    60
}

fn default_eviction_interval() -> u64 {
    3600
}

fn default_stale_lock() -> u64 {
    6 * 60 * 60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            scan_interval_secs: default_scan_interval(),
            staging_interval_secs: default_staging_interval(),
            eviction_interval_secs: default_eviction_interval(),
            stale_lock_secs: default_stale_lock(),
        }
    }
}

/// How one job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Another run of the same job held its lock.
    SkippedLocked,
    /// The run finished but reported errors.
    Failed(String),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::SkippedLocked => "skipped_locked",
            JobOutcome::Failed(_) => "failed",
        }
    }

    fn from_errors(skipped_locked: bool, errors: &[String]) -> Self {
        if skipped_locked {
            JobOutcome::SkippedLocked
        } else if errors.is_empty() {
            JobOutcome::Completed
        } else {
            JobOutcome::Failed(errors.join("; "))
        }
    }
}

/// A unit of periodic work.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Stable name used in logs, metrics and the status API.
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> JobOutcome;
}

/// Last-known state of one job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub interval_secs: u64,
    pub runs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

type History = Arc<RwLock<HashMap<&'static str, JobStatus>>>;

struct Registered {
    job: Arc<dyn PeriodicJob>,
    interval: Duration,
}

pub struct Scheduler {
    config: SchedulerConfig,
    jobs: Vec<Registered>,
    history: History,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            jobs: Vec::new(),
            history: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job. Jobs added after [`Scheduler::start`] are not looped.
    pub fn register(&mut self, job: Arc<dyn PeriodicJob>, interval: Duration) {
        self.jobs.push(Registered { job, interval });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn one loop per registered job.
    pub async fn start(&self) {
        if !self.config.enabled {
            info!("Scheduler disabled, periodic jobs will only run on demand");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        let mut handles = self.handles.lock().await;
        for registered in &self.jobs {
            handles.push(self.spawn_job_loop(registered));
        }
        info!("Scheduler started with {} jobs", self.jobs.len());
    }

    /// Signal all loops and wait for in-flight runs to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Job loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    /// Run a registered job right away, outside its loop.
    pub async fn run_now(&self, name: &str) -> Option<JobOutcome> {
        let registered = self.jobs.iter().find(|r| r.job.name() == name)?;
        Some(run_and_record(registered.job.as_ref(), &self.history).await)
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|r| r.job.name()).collect()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let history = self.history.read().await;
        let jobs = self
            .jobs
            .iter()
            .map(|r| {
                let mut status = history.get(r.job.name()).cloned().unwrap_or_default();
                status.name = r.job.name().to_string();
                status.interval_secs = r.interval.as_secs();
                status
            })
            .collect();

        SchedulerStatus {
            enabled: self.config.enabled,
            running: self.is_running(),
            jobs,
        }
    }

    fn spawn_job_loop(&self, registered: &Registered) -> JoinHandle<()> {
        let job = Arc::clone(&registered.job);
        let period = registered.interval;
        let history = Arc::clone(&self.history);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let name = job.name();
            info!(job = name, interval_secs = period.as_secs(), "Job loop started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(job = name, "Job loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        run_and_record(job.as_ref(), &history).await;
                    }
                }
            }
            info!(job = name, "Job loop stopped");
        })
    }
}

async fn run_and_record(job: &dyn PeriodicJob, history: &History) -> JobOutcome {
    let name = job.name();
    let started_at = Utc::now();
    let started = Instant::now();

    let outcome = job.run_once().await;

    let elapsed = started.elapsed();
    metrics::JOB_RUNS
        .with_label_values(&[name, outcome.as_str()])
        .inc();
    metrics::JOB_DURATION
        .with_label_values(&[name])
        .observe(elapsed.as_secs_f64());

    match &outcome {
        JobOutcome::Completed => debug!(job = name, ?elapsed, "Job run completed"),
        JobOutcome::SkippedLocked => debug!(job = name, "Job run skipped, lock held"),
        JobOutcome::Failed(e) => warn!(job = name, error = %e, "Job run reported errors"),
    }

    let mut history = history.write().await;
    let entry = history.entry(name).or_default();
    entry.runs += 1;
    entry.last_started_at = Some(started_at);
    entry.last_finished_at = Some(Utc::now());
    entry.last_outcome = Some(outcome.as_str().to_string());
    entry.last_error = match &outcome {
        JobOutcome::Failed(e) => Some(e.clone()),
        _ => None,
    };

    outcome
}
