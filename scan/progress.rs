use std::fmt;

/// Stages reported during a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScanProgressStage {
    Validation,
    Restarts,
}

impl ScanProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Validation => "input validation",
            Self::Restarts => "subset search restarts",
        }
    }
}

impl fmt::Display for ScanProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while scanning.
///
/// Restarts run on worker threads, so callbacks take `&self` and the
/// observer must be `Sync`.
pub trait ScanProgressObserver: Sync {
    fn on_stage_start(&self, stage: ScanProgressStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_restart_finish(&self, restart: usize, score: f64) {
        let _ = (restart, score);
    }
    fn on_stage_finish(&self, stage: ScanProgressStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopScanProgress;

impl ScanProgressObserver for NoopScanProgress {}
