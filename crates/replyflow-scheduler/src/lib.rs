//! Job scheduler — named periodic jobs on independent cadences.
//!
//! The three pipeline jobs (collect, generate, post) are registered here
//! as independent timers; they never signal each other, all coupling runs
//! through review status in the store. Each job is individually startable,
//! stoppable, and runnable-once, and a job never re-enters itself: a tick
//! that lands while the previous run is still executing is skipped and
//! logged instead of piling up.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use replyflow_core::{ReplyFlowError, Result};
use tokio::task::JoinHandle;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobEntry {
    period: Duration,
    run: JobFn,
    /// Held for the duration of a run; a tick that cannot take it is skipped.
    running: Arc<tokio::sync::Mutex<()>>,
    handle: Option<JoinHandle<()>>,
    completed_runs: Arc<AtomicU64>,
}

/// Snapshot of one registered job.
#[derive(Debug, Clone)]
pub struct JobStats {
    pub name: String,
    pub period: Duration,
    pub active: bool,
    pub completed_runs: u64,
}

/// Owns the pipeline's periodic jobs.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a named job. Replaces (and stops) any previous job with
    /// the same name. The job does not tick until `start` is called.
    pub fn register<F, Fut>(&self, name: &str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run: JobFn = Arc::new(move || Box::pin(job()) as JobFuture);
        let entry = JobEntry {
            period,
            run,
            running: Arc::new(tokio::sync::Mutex::new(())),
            handle: None,
            completed_runs: Arc::new(AtomicU64::new(0)),
        };
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(old) = jobs.insert(name.to_string(), entry) {
            if let Some(handle) = old.handle {
                handle.abort();
            }
        }
        tracing::info!("📅 Job registered: '{}' every {:?}", name, period);
    }

    /// Spawn timer loops for every registered job that is not yet running.
    pub fn start(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for (name, entry) in jobs.iter_mut() {
            if entry.handle.is_some() {
                continue;
            }
            let name = name.clone();
            let period = entry.period;
            let run = entry.run.clone();
            let running = entry.running.clone();
            let completed = entry.completed_runs.clone();
            entry.handle = Some(tokio::spawn(async move {
                // First tick lands one full period out; the bootstrap pass
                // covers the immediate run when one is wanted.
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                loop {
                    interval.tick().await;
                    match running.try_lock() {
                        Ok(_guard) => {
                            tracing::debug!("⏰ Job tick: '{}'", name);
                            run().await;
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            tracing::warn!("⏳ Job '{}' still running, skipping tick", name);
                        }
                    }
                }
            }));
        }
    }

    /// Run one job immediately, waiting for any in-flight run to finish
    /// first so the job never observes itself running twice.
    pub async fn run_once(&self, name: &str) -> Result<()> {
        let (run, running, completed) = {
            let jobs = self.jobs.lock().unwrap();
            let entry = jobs
                .get(name)
                .ok_or_else(|| ReplyFlowError::UnknownJob(name.into()))?;
            (
                entry.run.clone(),
                entry.running.clone(),
                entry.completed_runs.clone(),
            )
        };
        let _guard = running.lock().await;
        run().await;
        completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Cancel one job's timer. The registration stays, so `start` can
    /// bring it back.
    pub fn stop(&self, name: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(name).and_then(|e| e.handle.take()) {
            Some(handle) => {
                handle.abort();
                tracing::info!("🛑 Job stopped: '{}'", name);
                true
            }
            None => false,
        }
    }

    /// Cancel every timer. In-flight browser sessions are abandoned, which
    /// matches the shutdown contract of the platform posters.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for (name, entry) in jobs.iter_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
                tracing::info!("🛑 Job stopped: '{}'", name);
            }
        }
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> Vec<JobStats> {
        let jobs = self.jobs.lock().unwrap();
        let mut stats: Vec<JobStats> = jobs
            .iter()
            .map(|(name, e)| JobStats {
                name: name.clone(),
                period: e.period,
                active: e.handle.is_some(),
                completed_runs: e.completed_runs.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            for entry in jobs.values_mut() {
                if let Some(handle) = entry.handle.take() {
                    handle.abort();
                }
            }
        }
    }
}
