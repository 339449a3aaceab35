//! User-facing progress log.
//!
//! Every step of a run reports through a [`LogSink`] handed to it at construction.
//! The shell decides where the lines go; when no callback is installed they are
//! printed to the console. Diagnostics for developers go through `tracing` instead.

use std::fmt;
use std::sync::Arc;

/// Marker carried by every failure line.
pub const ERROR_MARKER: &str = "ERROR";

/// Marker carried by the line that announces a successful run.
pub const COMPLETION_MARKER: &str = "completed";

pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct LogSink {
    callback: Option<LogCallback>,
}

impl LogSink {
    /// A sink that prints to stdout.
    pub fn console() -> Self {
        Self { callback: None }
    }

    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(target: "report_fetcher::sink", "{message}");
        match &self.callback {
            Some(callback) => callback(message),
            None => println!("{message}"),
        }
    }

    /// Logs a failure line tagged with [`ERROR_MARKER`].
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(format!("{ERROR_MARKER}: {}", message.as_ref()));
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Whether the shell should surface this line as a notification.
pub fn is_notification(line: &str) -> bool {
    line.to_uppercase().contains(ERROR_MARKER)
        || line.to_lowercase().contains(COMPLETION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callback_receives_lines_in_call_order() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = LogSink::new(move |line| captured.lock().unwrap().push(line.to_string()));

        sink.log("first");
        sink.error("second");

        let lines = lines.lock().unwrap();
        assert_eq!(*lines, vec!["first".to_string(), "ERROR: second".to_string()]);
    }

    #[test]
    fn notification_markers_are_case_insensitive() {
        assert!(is_notification("ERROR: boom"));
        assert!(is_notification("error while switching window"));
        assert!(is_notification("Automation completed successfully!"));
        assert!(is_notification("Run COMPLETED"));
        assert!(!is_notification("Logging in..."));
    }
}
