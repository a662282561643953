//! Orchestrator
//!
//! Binds the rewriter, registries, and sink into the configure / register /
//! arm / report lifecycle. Registration only collects targets; nothing is
//! patched until `start`, and `detect` may be called any number of times
//! afterwards.

use crate::domain::{DetectMode, HookError, OutputMode};
use crate::output;
use crate::plt::PltHook;
use crate::{lock, memory};
use lazy_static::lazy_static;
use log::info;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One registered ELF object; `None` means the main executable.
type HookTarget = Option<String>;

struct DetectorState {
    mode: DetectMode,
    output: OutputMode,
    work_dir: Option<PathBuf>,
    memory_targets: Vec<HookTarget>,
    lock_targets: Vec<HookTarget>,
}

lazy_static! {
    static ref STATE: Mutex<DetectorState> = Mutex::new(DetectorState {
        mode: DetectMode::BOTH,
        output: OutputMode::CONSOLE,
        work_dir: None,
        memory_targets: Vec::new(),
        lock_targets: Vec::new(),
    });
}

fn log_file_path(work_dir: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    PathBuf::from(work_dir).join(format!("detector_{stamp}.log"))
}

fn describe(target: &HookTarget) -> &str {
    target.as_deref().unwrap_or("main executable")
}

/// Configure detection mode and the output sink. The log file lands at
/// `<work_dir>/detector_<unix_seconds>.log`; a missing work directory
/// degrades to console-only output with a warning.
pub fn init(work_dir: Option<&str>, mode: DetectMode, output_mode: OutputMode) {
    let output_mode = match work_dir {
        Some(dir) => {
            let log_path = log_file_path(dir);
            output::configure(output_mode, Some(&log_path));
            info!("detector configured: mode={mode}, log file {}", log_path.display());
            output_mode
        }
        None => {
            output::configure(OutputMode::CONSOLE, None);
            output::warn("no work directory given; logging to console only");
            OutputMode::CONSOLE
        }
    };

    let mut state = STATE.lock().unwrap_or_else(|e| e.into_inner());
    state.mode = mode;
    state.output = output_mode;
    state.work_dir = work_dir.map(PathBuf::from);
}

/// Queue a shared object for instrumentation under every active mode.
pub fn register(lib_name: &str) {
    register_target(Some(lib_name.to_string()));
}

/// Queue the main executable for instrumentation under every active mode.
pub fn register_main() {
    register_target(None);
}

fn register_target(target: HookTarget) {
    let mut state = STATE.lock().unwrap_or_else(|e| e.into_inner());
    if state.mode.memory() {
        state.memory_targets.push(target.clone());
    }
    if state.mode.lock() {
        state.lock_targets.push(target);
    }
}

/// Arm every queued target. Per-symbol failures are reported and skipped;
/// an object that cannot be opened loses only its own instrumentation.
pub fn start() {
    let state = STATE.lock().unwrap_or_else(|e| e.into_inner());

    for target in &state.memory_targets {
        info!("arming allocation hooks for {}", describe(target));
        match open_target(target) {
            Ok(hook) => memory::install(&hook),
            Err(e) => output::error(&format!(
                "could not instrument {} for memory tracking: {e}",
                describe(target)
            )),
        }
    }

    for target in &state.lock_targets {
        info!("arming mutex hooks for {}", describe(target));
        match open_target(target) {
            Ok(hook) => lock::install(&hook),
            Err(e) => output::error(&format!(
                "could not instrument {} for lock tracking: {e}",
                describe(target)
            )),
        }
    }
}

fn open_target(target: &HookTarget) -> Result<PltHook, HookError> {
    PltHook::open(target.as_deref())
}

/// Current configuration snapshot: mode, output targets, work directory.
#[must_use]
pub fn config() -> (DetectMode, OutputMode, Option<PathBuf>) {
    let state = STATE.lock().unwrap_or_else(|e| e.into_inner());
    (state.mode, state.output, state.work_dir.clone())
}

/// Render every active registry's report. Reporting reads registry state
/// under its lock and never mutates it.
pub fn detect() {
    let mode = STATE.lock().unwrap_or_else(|e| e.into_inner()).mode;
    if mode.memory() {
        memory::report();
    }
    if mode.lock() {
        lock::report();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_shape() {
        let path = log_file_path("/tmp/logs");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("detector_"));
        assert!(name.ends_with(".log"));
        assert!(path.starts_with("/tmp/logs"));
    }

    #[test]
    fn test_describe_targets() {
        assert_eq!(describe(&None), "main executable");
        assert_eq!(describe(&Some("libm.so.6".to_string())), "libm.so.6");
    }
}
