//! Log routing.
//!
//! The subscriber is installed once at startup; the `LogFile` UCI option
//! can re-route output at any time, so the writer indirects through a
//! process-wide slot. Log output must never touch stdout, which belongs
//! to the UCI protocol.

use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

static LOG_FILE: RwLock<Option<File>> = RwLock::new(None);

/// Route logs to `path`; the special value `<stderr>` (or an empty
/// string) routes back to stderr.
pub fn set_log_file(path: &str) {
    let mut slot = LOG_FILE.write();
    if path.is_empty() || path == "<stderr>" {
        *slot = None;
        return;
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => *slot = Some(file),
        Err(e) => {
            *slot = None;
            eprintln!("info string cannot open log file {path}: {e}");
        }
    }
}

pub struct RoutedWriter;

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let slot = LOG_FILE.read();
        match slot.as_ref() {
            Some(mut file) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let slot = LOG_FILE.read();
        match slot.as_ref() {
            Some(mut file) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}

#[derive(Clone)]
pub struct MakeRoutedWriter;

impl<'a> MakeWriter<'a> for MakeRoutedWriter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter
    }
}

/// Install the global subscriber. `QUARTZ_LOG` controls the filter, with
/// warnings and above shown by default.
pub fn init() {
    let filter = EnvFilter::try_from_env("QUARTZ_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MakeRoutedWriter)
        .with_ansi(false)
        .init();
}
