//! Progress reporting for batch import and resync.

use std::path::PathBuf;

/// Event emitted once per candidate file in a batch run.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub operation: &'static str,
    /// 1-based index of the file just processed.
    pub current: u64,
    pub total: u64,
    pub path: PathBuf,
    pub message: Option<String>,
}

/// Receiver for progress updates. The CLI drives an `indicatif` bar through it.
pub trait ProgressHandler {
    fn on_progress(&self, event: ProgressEvent);
}

/// Emit a progress event if a handler is provided.
pub fn emit_progress(
    handler: Option<&dyn ProgressHandler>,
    operation: &'static str,
    current: u64,
    total: u64,
    path: &std::path::Path,
    message: Option<String>,
) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            operation,
            current,
            total,
            path: path.to_path_buf(),
            message,
        });
    }
}
