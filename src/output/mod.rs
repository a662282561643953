//! Report sink
//!
//! Multiplexes report text to standard output and/or a log file. The console
//! stream may carry ANSI color; the file always receives the plain
//! rendition. Each write is flushed so a crashing target still leaves a
//! usable log behind.

use crate::domain::OutputMode;
use console::Style;
use lazy_static::lazy_static;
use log::debug;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct OutputSink {
    mode: OutputMode,
    file: Option<File>,
    path: Option<PathBuf>,
}

lazy_static! {
    static ref SINK: Mutex<OutputSink> =
        Mutex::new(OutputSink { mode: OutputMode::CONSOLE, file: None, path: None });
}

/// Point the sink at its targets. Any previously open log file is closed
/// first; a file target that cannot be created degrades to console output
/// with a warning rather than failing the caller.
pub fn configure(mode: OutputMode, log_path: Option<&Path>) {
    let mut sink = SINK.lock().unwrap_or_else(|e| e.into_inner());
    sink.file = None;
    sink.path = None;
    sink.mode = mode;

    if !mode.file() {
        return;
    }
    let Some(path) = log_path else {
        return;
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                println!("WARNING: could not create log directory {}: {e}", parent.display());
                return;
            }
        }
    }
    match File::create(path) {
        Ok(file) => {
            sink.file = Some(file);
            sink.path = Some(path.to_path_buf());
        }
        Err(e) => {
            println!("WARNING: could not open log file {}: {e}", path.display());
        }
    }
}

/// Path of the currently open log file, if any.
#[must_use]
pub fn log_path() -> Option<PathBuf> {
    SINK.lock().unwrap_or_else(|e| e.into_inner()).path.clone()
}

fn write_file(sink: &mut OutputSink, text: &str) {
    if let Some(ref mut file) = sink.file {
        if writeln!(file, "{text}").and_then(|()| file.flush()).is_err() {
            debug!("log file write failed, dropping file target");
            sink.file = None;
        }
    }
}

/// Write one plain line to the configured targets.
pub fn print_line(text: &str) {
    let mut sink = SINK.lock().unwrap_or_else(|e| e.into_inner());
    if sink.mode.console() {
        println!("{text}");
    }
    write_file(&mut sink, text);
}

/// Write one line, styled on the console and plain in the file.
pub fn print_styled(style: &Style, text: &str) {
    let mut sink = SINK.lock().unwrap_or_else(|e| e.into_inner());
    if sink.mode.console() {
        println!("{}", style.apply_to(text));
    }
    write_file(&mut sink, text);
}

/// Write one line assembled from segments, each optionally styled.
pub fn print_parts(parts: &[(Option<&Style>, &str)]) {
    let mut sink = SINK.lock().unwrap_or_else(|e| e.into_inner());
    if sink.mode.console() {
        let mut line = String::new();
        for (style, text) in parts {
            match style {
                Some(style) => line.push_str(&style.apply_to(*text).to_string()),
                None => line.push_str(text),
            }
        }
        println!("{line}");
    }
    let plain: String = parts.iter().map(|(_, text)| *text).collect();
    write_file(&mut sink, &plain);
}

/// Warning line with the conventional prefix, yellow on the console.
pub fn warn(text: &str) {
    print_styled(&Style::new().yellow(), &format!("WARNING: {text}"));
}

/// Error line with the conventional prefix, red on the console.
pub fn error(text: &str) {
    print_styled(&Style::new().red(), &format!("ERROR: {text}"));
}
