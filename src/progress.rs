use std::io::{self, Write};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Quiet,
    Info,
    Debug,
}

/// Stderr logger with elapsed-time stamps.
pub struct ConsoleLog {
    level: LogLevel,
    t0: Instant,
}

impl ConsoleLog {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.level >= LogLevel::Info {
            self.emit("", msg.as_ref());
        }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        if self.level >= LogLevel::Debug {
            self.emit("debug: ", msg.as_ref());
        }
    }

    /// Shown at every level.
    pub fn warn(&self, msg: impl AsRef<str>) {
        self.emit("warning: ", msg.as_ref());
    }

    fn emit(&self, prefix: &str, msg: &str) {
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {prefix}{msg}");
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
