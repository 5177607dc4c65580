//! Playback supervision.
//!
//! A background loop keeps the desired pipeline alive: while playback is
//! wanted it checks liveness every couple of seconds and relaunches dead
//! pipelines with exponential backoff. HTTP handlers start and stop
//! playback synchronously; the pipeline slot mutex serializes them against
//! the loop so only one party ever launches at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use pcm_meter::{LevelSample, LevelTap};

use crate::error::PlayerError;
use crate::launcher::{Launcher, PlaybackRequest};
use crate::pipeline::PipelineHandle;
use crate::process;

/// Liveness check interval while a pipeline is believed healthy.
pub(crate) const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);
/// Idle interval while playback is not wanted.
const IDLE_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
/// Pause after a successful launch before the first liveness check.
const SETTLE_AFTER_LAUNCH: std::time::Duration = std::time::Duration::from_millis(500);
/// Pause after a kill sweep so ALSA devices are released.
const SETTLE_AFTER_SWEEP: std::time::Duration = std::time::Duration::from_millis(500);

pub(crate) const BACKOFF_START_SECS: f64 = 1.0;
pub(crate) const BACKOFF_FACTOR: f64 = 1.5;
pub(crate) const BACKOFF_MAX_SECS: f64 = 10.0;

/// Next relaunch delay after another failure.
pub(crate) fn next_backoff(current_secs: f64) -> f64 {
    (current_secs * BACKOFF_FACTOR).min(BACKOFF_MAX_SECS)
}

/// Status snapshot for the HTTP surface; reads flags, never locks the
/// pipeline slot.
pub(crate) struct SupervisorStatus {
    pub running: bool,
    pub pipeline_alive: bool,
    pub backend: Option<&'static str>,
    pub consecutive_failures: u32,
}

struct SupervisorInner {
    /// True while playback is wanted; pump and loop both watch this.
    should_run: Arc<AtomicBool>,
    /// Request the loop relaunches when the pipeline dies.
    desired: std::sync::Mutex<Option<PlaybackRequest>>,
    /// The live pipeline. Held across teardown and launch, so start/stop
    /// and the loop never race a launch.
    slot: tokio::sync::Mutex<Option<PipelineHandle>>,
    /// Mirrors of slot state for lock-free status reads.
    pipeline_alive: AtomicBool,
    active_backend: std::sync::Mutex<Option<&'static str>>,
    consecutive_failures: AtomicU32,
    levels: Arc<LevelTap>,
    launcher: Launcher,
}

#[derive(Clone)]
pub(crate) struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub(crate) fn new() -> Self {
        let should_run = Arc::new(AtomicBool::new(false));
        let levels = Arc::new(LevelTap::default());
        let launcher = Launcher::new(Arc::clone(&should_run), Arc::clone(&levels));
        Supervisor {
            inner: Arc::new(SupervisorInner {
                should_run,
                desired: std::sync::Mutex::new(None),
                slot: tokio::sync::Mutex::new(None),
                pipeline_alive: AtomicBool::new(false),
                active_backend: std::sync::Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
                levels,
                launcher,
            }),
        }
    }

    pub(crate) fn levels(&self) -> LevelSample {
        self.inner.levels.load()
    }

    pub(crate) fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            running: self.inner.should_run.load(Ordering::Relaxed),
            pipeline_alive: self.inner.pipeline_alive.load(Ordering::Relaxed),
            backend: self.inner.active_backend.lock().ok().and_then(|g| *g),
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// Start playback: tear down whatever is running, then launch once
    /// synchronously so the caller gets a real error. The loop takes over
    /// retries either way.
    pub(crate) async fn start(&self, req: PlaybackRequest) -> Result<(), PlayerError> {
        let inner = &self.inner;
        let was_running = inner.should_run.swap(false, Ordering::Relaxed);
        let mut slot = inner.slot.lock().await;
        if was_running || slot.is_some() {
            self.clear_slot(&mut slot, true).await;
        }

        if let Ok(mut desired) = inner.desired.lock() {
            *desired = Some(req.clone());
        }
        inner.consecutive_failures.store(0, Ordering::Relaxed);
        inner.should_run.store(true, Ordering::Relaxed);

        match inner.launcher.launch(&req).await {
            Ok(pipeline) => {
                self.install(&mut slot, pipeline);
                Ok(())
            }
            Err(err) => {
                // Keep should_run set; the loop retries with backoff.
                inner.consecutive_failures.store(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Stop playback. Returns whether anything was actually stopped, so
    /// a second stop is a visible no-op.
    pub(crate) async fn stop(&self) -> bool {
        let inner = &self.inner;
        let was_running = inner.should_run.swap(false, Ordering::Relaxed);
        if let Ok(mut desired) = inner.desired.lock() {
            *desired = None;
        }
        let mut slot = inner.slot.lock().await;
        let had_pipeline = slot.is_some();
        if was_running || had_pipeline {
            self.clear_slot(&mut slot, true).await;
        }
        inner.consecutive_failures.store(0, Ordering::Relaxed);
        inner.levels.clear();
        was_running || had_pipeline
    }

    /// Stop flag plus process sweep for shutdown paths that cannot await.
    pub(crate) fn shutdown_blocking(&self) {
        self.inner.should_run.store(false, Ordering::Relaxed);
        process::sweep_kill();
    }

    fn install(&self, slot: &mut Option<PipelineHandle>, pipeline: PipelineHandle) {
        self.inner.pipeline_alive.store(true, Ordering::Relaxed);
        if let Ok(mut backend) = self.inner.active_backend.lock() {
            *backend = Some(pipeline.kind.as_str());
        }
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        *slot = Some(pipeline);
    }

    /// Tear down the slotted pipeline and optionally sweep stragglers.
    async fn clear_slot(&self, slot: &mut Option<PipelineHandle>, sweep: bool) {
        if let Some(pipeline) = slot.take() {
            pipeline.teardown().await;
        }
        self.inner.pipeline_alive.store(false, Ordering::Relaxed);
        if let Ok(mut backend) = self.inner.active_backend.lock() {
            *backend = None;
        }
        if sweep {
            process::sweep_kill();
            tokio::time::sleep(SETTLE_AFTER_SWEEP).await;
        }
    }

    fn desired_request(&self) -> Option<PlaybackRequest> {
        self.inner.desired.lock().ok().and_then(|g| g.clone())
    }

    /// Run the supervision loop on a dedicated thread with its own
    /// single-threaded runtime, so pipeline churn never ties up the
    /// HTTP workers.
    pub(crate) fn spawn_loop(&self) -> anyhow::Result<std::thread::JoinHandle<()>> {
        let supervisor = self.clone();
        let handle = std::thread::Builder::new()
            .name("playback-supervisor".to_string())
            .spawn(move || match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(supervisor.run_loop()),
                Err(err) => {
                    tracing::error!(error = %err, "failed to build supervisor runtime");
                }
            })?;
        Ok(handle)
    }

    async fn run_loop(self) {
        let inner = &self.inner;
        let mut backoff_secs = BACKOFF_START_SECS;
        loop {
            if !inner.should_run.load(Ordering::Relaxed) {
                backoff_secs = BACKOFF_START_SECS;
                tokio::time::sleep(IDLE_INTERVAL).await;
                continue;
            }
            let Some(req) = self.desired_request() else {
                tokio::time::sleep(IDLE_INTERVAL).await;
                continue;
            };

            // Healthy fast path: peek without holding the slot.
            let alive = {
                let slot = inner.slot.lock().await;
                slot.as_ref().map(PipelineHandle::alive).unwrap_or(false)
            };
            inner.pipeline_alive.store(alive, Ordering::Relaxed);
            if alive {
                backoff_secs = BACKOFF_START_SECS;
                inner.consecutive_failures.store(0, Ordering::Relaxed);
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let mut slot = inner.slot.lock().await;
            // A stop may have won the lock race; re-check before launching.
            if !inner.should_run.load(Ordering::Relaxed) {
                continue;
            }
            if let Some(dead) = slot.take() {
                let detail = dead
                    .dead_leg()
                    .map(|(leg, status)| format!("{leg} exited ({status:?})"))
                    .unwrap_or_else(|| "data path stalled".to_string());
                let err = PlayerError::PipelineDied(detail);
                tracing::warn!(
                    backend = %dead.kind,
                    uptime_secs = dead.started_at.elapsed().as_secs(),
                    error = %err,
                    "pipeline died, restarting"
                );
                dead.teardown().await;
            }
            self.inner.pipeline_alive.store(false, Ordering::Relaxed);

            match inner.launcher.launch(&req).await {
                Ok(pipeline) => {
                    self.install(&mut slot, pipeline);
                    backoff_secs = BACKOFF_START_SECS;
                    drop(slot);
                    tokio::time::sleep(SETTLE_AFTER_LAUNCH).await;
                }
                Err(err) => {
                    let failures = inner.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        error = %err,
                        failures,
                        retry_secs = backoff_secs,
                        "pipeline launch failed, backing off"
                    );
                    drop(slot);
                    tokio::time::sleep(std::time::Duration::from_secs_f64(backoff_secs)).await;
                    backoff_secs = next_backoff(backoff_secs);
                }
            }
        }
    }
}
