//! Scheduled retrieval of monthly reports from a session-based web application
//!
//! A run logs in to the remote system with a fresh browser for each of three
//! months (the current one and the two before it), fills the report form, waits
//! for the download and renames it to a `<MONTHCODE><YEAR>.<ext>` name. Runs are
//! started on demand or by a daily trigger through the [`Scheduler`].
//!
//! The browser is reached through the [`BrowserDriver`] trait; [`ChromiumFactory`]
//! provides the DevTools-based implementation.

pub mod chromium;
pub mod config;
pub mod driver;
pub mod errors;
pub mod finalize;
pub mod log_sink;
pub mod orchestrator;
pub mod period;
pub mod request;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod wait;

pub use chromium::{ChromiumDriver, ChromiumFactory};
pub use config::{Credentials, FetcherConfig, FormLayout, Timings};
pub use driver::{BrowserDriver, DriverFactory, LaunchOptions, WindowHandle};
pub use errors::FetchError;
pub use finalize::{DownloadArtifact, DownloadFinalizer};
pub use log_sink::{is_notification, LogSink};
pub use orchestrator::{
    FailurePolicy, PeriodOutcome, PeriodStatus, RunOrchestrator, RunReport, RunTarget,
};
pub use period::{compute_periods, derive_range, format_label, DateRange, ReportingPeriod};
pub use request::ReportRequestExecutor;
pub use scheduler::{ScheduleEntry, Scheduler, TriggerOutcome};
pub use selector::Selector;
pub use session::{Session, SessionDriver};
