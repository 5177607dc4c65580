//! Running pipeline handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::process::ProcHandle;

const LEG_EXIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Backend strategy behind a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendKind {
    /// Single external player managing its own buffering and output.
    Managed,
    /// Decoder piped through the server into the ALSA writer.
    Transcode,
    /// MP3 decoder piped OS-level into the ALSA writer.
    Mp3Direct,
}

impl BackendKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            BackendKind::Managed => "managed-player",
            BackendKind::Transcode => "transcode",
            BackendKind::Mp3Direct => "mp3-direct",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A launched pipeline: its process legs plus the flags its helper tasks
/// (pump or capture meter) communicate through.
pub(crate) struct PipelineHandle {
    pub(crate) kind: BackendKind,
    pub(crate) started_at: std::time::Instant,
    legs: Vec<ProcHandle>,
    /// Set by the pump when the data path breaks before a process exits.
    pump_dead: Arc<AtomicBool>,
    /// Tells the capture meter task to stop sampling.
    meter_stop: Arc<AtomicBool>,
}

impl PipelineHandle {
    pub(crate) fn new(kind: BackendKind, legs: Vec<ProcHandle>) -> Self {
        PipelineHandle {
            kind,
            started_at: std::time::Instant::now(),
            legs,
            pump_dead: Arc::new(AtomicBool::new(false)),
            meter_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn pump_dead_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.pump_dead)
    }

    pub(crate) fn meter_stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.meter_stop)
    }

    /// All legs running and the pump (if any) still moving data.
    pub(crate) fn alive(&self) -> bool {
        if self.pump_dead.load(Ordering::Relaxed) {
            return false;
        }
        self.legs.iter().all(ProcHandle::alive)
    }

    /// Name and exit status of the first dead leg, for diagnostics.
    pub(crate) fn dead_leg(&self) -> Option<(&'static str, Option<std::process::ExitStatus>)> {
        self.legs
            .iter()
            .find(|leg| !leg.alive())
            .map(|leg| (leg.name(), leg.exit_status()))
    }

    /// Stop helper tasks, terminate every leg, and give each a moment
    /// to exit.
    pub(crate) async fn teardown(self) {
        self.meter_stop.store(true, Ordering::Relaxed);
        for leg in &self.legs {
            leg.terminate();
        }
        for leg in &self.legs {
            leg.wait_with_timeout(LEG_EXIT_TIMEOUT).await;
        }
        tracing::debug!(backend = %self.kind, "pipeline torn down");
    }
}
