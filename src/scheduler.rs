//! Poll scheduler: per-source cadence, push triggers, and reentrancy guard.
//!
//! Every registered source gets its own loop task. The loop wakes on the
//! source's interval tick, on its trigger [`Notify`] (push signals and
//! manual triggers), and on settings reloads. Each wake-up tries to launch
//! one run:
//!
//! - A per-source [`AtomicBool`] guard admits at most one in-flight run.
//!   A wake-up that finds the guard taken is skipped, not queued.
//! - The run executes in its own task, so a panic surfaces as a failed
//!   run of that source and nothing else.
//! - The settings snapshot is taken when the run launches and kept until
//!   it finishes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{SettingsHandle, SourceSettings};
use crate::domain::ServiceType;
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, RunReport};
use crate::sources::SourceAdapter;

const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// What caused a launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Interval tick.
    Tick,
    /// Push signal or manual trigger.
    Signal,
}

/// Result of a launch attempt.
#[derive(Debug)]
pub enum Launch {
    /// A run was started.
    Started(JoinHandle<()>),
    /// A run of the same source is still in flight.
    Busy,
    /// The source has no connection settings.
    Unconfigured,
}

/// Observable state of one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// Source name.
    pub name: String,
    /// Owning service.
    pub service: ServiceType,
    /// A run is in flight.
    pub running: bool,
    /// Start of the latest run.
    pub last_started: Option<DateTime<Utc>>,
    /// End of the latest run.
    pub last_finished: Option<DateTime<Utc>>,
    /// Report of the latest successful run.
    pub last_report: Option<RunReport>,
    /// Error of the latest run, cleared on success.
    pub last_error: Option<String>,
    /// Successful runs since start.
    pub runs_succeeded: u64,
    /// Failed runs since start.
    pub runs_failed: u64,
    /// Wake-ups skipped because a run was in flight.
    pub runs_skipped: u64,
}

#[derive(Debug)]
struct SourceRuntime {
    adapter: Arc<dyn SourceAdapter>,
    in_flight: AtomicBool,
    skipped: AtomicU64,
    trigger: Arc<Notify>,
    status: RwLock<SourceStatus>,
}

/// Holds the in-flight flag of a source; releases it on drop, including
/// when the run task is aborted.
#[derive(Debug)]
struct RunGuard {
    runtime: Arc<SourceRuntime>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runtime.in_flight.store(false, Ordering::Release);
    }
}

impl SourceRuntime {
    fn new(adapter: Arc<dyn SourceAdapter>) -> Self {
        let status = SourceStatus {
            name: adapter.name().to_string(),
            service: adapter.service(),
            running: false,
            last_started: None,
            last_finished: None,
            last_report: None,
            last_error: None,
            runs_succeeded: 0,
            runs_failed: 0,
            runs_skipped: 0,
        };
        Self {
            adapter,
            in_flight: AtomicBool::new(false),
            skipped: AtomicU64::new(0),
            trigger: Arc::new(Notify::new()),
            status: RwLock::new(status),
        }
    }

    fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                runtime: Arc::clone(self),
            })
    }

    async fn started(&self) {
        let mut status = self.status.write().await;
        status.running = true;
        status.last_started = Some(Utc::now());
    }

    async fn finished(&self, outcome: Result<RunReport, PipelineError>) {
        let mut status = self.status.write().await;
        status.running = false;
        status.last_finished = Some(Utc::now());
        match outcome {
            Ok(report) => {
                status.runs_succeeded += 1;
                status.last_error = None;
                status.last_report = Some(report);
            }
            Err(e) => {
                tracing::warn!(source = %status.name, error = %e, "run failed, cursor unchanged");
                status.runs_failed += 1;
                status.last_error = Some(e.to_string());
            }
        }
    }
}

/// Drives every registered source.
#[derive(Debug)]
pub struct PollScheduler {
    pipeline: Pipeline,
    settings: SettingsHandle,
    sources: BTreeMap<String, Arc<SourceRuntime>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PollScheduler {
    /// Creates a scheduler with no sources.
    #[must_use]
    pub fn new(pipeline: Pipeline, settings: SettingsHandle, cancel: CancellationToken) -> Self {
        Self {
            pipeline,
            settings,
            sources: BTreeMap::new(),
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a source. A later source with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let name = adapter.name().to_string();
        self.sources
            .insert(name, Arc::new(SourceRuntime::new(adapter)));
    }

    /// Returns the trigger of a source, for wiring push signals.
    #[must_use]
    pub fn trigger_handle(&self, name: &str) -> Option<Arc<Notify>> {
        self.sources.get(name).map(|rt| Arc::clone(&rt.trigger))
    }

    /// Returns the pipeline runs execute on.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Returns the settings handle the scheduler reads from.
    #[must_use]
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Spawns one loop task per registered source.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        for runtime in self.sources.values() {
            let scheduler = Arc::clone(self);
            let runtime = Arc::clone(runtime);
            tracing::info!(source = runtime.adapter.name(), "starting source loop");
            tasks.push(tokio::spawn(async move {
                scheduler.source_loop(runtime).await;
            }));
        }
    }

    async fn source_loop(&self, runtime: Arc<SourceRuntime>) {
        let mut changes = self.settings.subscribe();
        loop {
            let period = runtime
                .adapter
                .interval(&self.settings.current())
                .max(MIN_INTERVAL);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // rebuild the ticker from the new settings
                        break;
                    }
                    () = runtime.trigger.notified() => {
                        let _ = self.launch(&runtime, RunTrigger::Signal);
                    }
                    _ = ticker.tick() => {
                        let _ = self.launch(&runtime, RunTrigger::Tick);
                    }
                }
            }
        }
    }

    fn launch(&self, runtime: &Arc<SourceRuntime>, trigger: RunTrigger) -> Launch {
        let name = runtime.adapter.name();
        let Some(guard) = runtime.try_begin() else {
            runtime.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(source = name, ?trigger, "previous run still in flight, skipping");
            return Launch::Busy;
        };

        let settings = self.settings.current();
        if !runtime.adapter.configured(&settings) {
            tracing::debug!(source = name, "source not configured, skipping");
            return Launch::Unconfigured;
        }

        tracing::debug!(source = name, ?trigger, version = settings.version, "launching run");
        let pipeline = self.pipeline.clone();
        let runtime = Arc::clone(runtime);
        Launch::Started(tokio::spawn(async move {
            let _guard = guard;
            runtime.started().await;

            let adapter = Arc::clone(&runtime.adapter);
            let run = tokio::spawn(async move { pipeline.run_source(adapter.as_ref(), &settings).await });
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(join) => Err(PipelineError::Internal(format!("run aborted: {join}"))),
            };
            runtime.finished(outcome).await;
        }))
    }

    /// Requests an immediate run of `name`, subject to the same guard as
    /// ticks.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownSource`] if no such source exists.
    pub fn trigger(&self, name: &str) -> Result<Launch, PipelineError> {
        let runtime = self
            .sources
            .get(name)
            .ok_or_else(|| PipelineError::UnknownSource(name.to_string()))?;
        Ok(self.launch(runtime, RunTrigger::Signal))
    }

    /// Returns the status of every source, ordered by name.
    pub async fn statuses(&self) -> Vec<SourceStatus> {
        let mut out = Vec::with_capacity(self.sources.len());
        for runtime in self.sources.values() {
            let mut status = runtime.status.read().await.clone();
            status.runs_skipped = runtime.skipped.load(Ordering::Relaxed);
            out.push(status);
        }
        out
    }

    /// Names of the sources that have connection settings in `settings`.
    pub fn configured_sources<'a>(
        &'a self,
        settings: &'a SourceSettings,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.sources
            .iter()
            .filter(|(_, rt)| rt.adapter.configured(settings))
            .map(|(name, _)| name.as_str())
    }

    /// Cancels every loop and waits for them to exit. In-flight runs are
    /// left to finish on their own.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("scheduler stopped");
    }
}
