//! On-demand and daily triggers for runs.
//!
//! A [`Scheduler`] owns the Idle/Running state shared by both triggers: a trigger
//! that fires while a run is in flight gets [`TriggerOutcome::Busy`] instead of
//! starting a second run over the same download directory. At most one daily
//! trigger exists at a time; scheduling a new one replaces it.
//!
//! All methods must be called from within a Tokio runtime.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::FetchError;
use crate::log_sink::{LogSink, COMPLETION_MARKER};
use crate::orchestrator::RunTarget;

/// Resolution of the daily trigger check.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Time of day of the recurring trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleEntry {
    hour: u32,
    minute: u32,
}

impl ScheduleEntry {
    pub fn new(hour: u32, minute: u32) -> Result<Self, FetchError> {
        if hour > 23 || minute > 59 {
            return Err(FetchError::ConfigError(format!(
                "invalid schedule time {hour}:{minute}, expected HH:MM"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// The first occurrence strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.time());
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ScheduleEntry {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || FetchError::ConfigError(format!("invalid schedule time {s:?}, expected HH:MM"));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let parse = |part: &str| {
            let part = part.trim();
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };
        Self::new(parse(hour)?, parse(minute)?)
    }
}

/// Result of asking a trigger to start a run.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// The run was spawned; the handle resolves when it ends.
    Started(JoinHandle<()>),
    /// Another run is still in flight.
    Busy,
}

impl TriggerOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, TriggerOutcome::Started(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Trigger {
    entry: ScheduleEntry,
    next_fire: NaiveDateTime,
}

struct Inner {
    target: Arc<dyn RunTarget>,
    sink: LogSink,
    running: AtomicBool,
    trigger: Mutex<Option<Trigger>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Returns the state to Idle when a run ends, panics included.
struct RunGuard(Arc<Inner>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl Inner {
    fn start_run(self: &Arc<Self>) -> TriggerOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Run requested while another run is in progress");
            self.sink.log("A run is already in progress; this trigger was ignored.");
            return TriggerOutcome::Busy;
        }

        self.sink.log("Starting automation...");
        let guard = RunGuard(self.clone());
        let handle = tokio::spawn(async move {
            let inner = guard.0.clone();
            let run = std::panic::AssertUnwindSafe(inner.target.run_once()).catch_unwind();
            match run.await {
                Ok(Ok(report)) if report.is_success() => {
                    info!(artifacts = report.outcomes.len(), "Run finished");
                    inner.sink.log(format!("Automation {COMPLETION_MARKER} successfully!"));
                }
                Ok(Ok(report)) => {
                    let failed: Vec<_> = report.failures().map(|o| o.label.as_str()).collect();
                    let failed = failed.join(", ");
                    inner.sink.error(format!("Automation finished with failures: {failed}"));
                }
                Ok(Err(e)) => {
                    error!("Run failed: {e}");
                    inner.sink.error(format!("The automation failed: {e}"));
                }
                Err(_) => {
                    error!("Run panicked");
                    inner.sink.error("The automation stopped unexpectedly.");
                }
            }
            drop(guard);
        });
        TriggerOutcome::Started(handle)
    }

    /// Fires the daily trigger if `now` reached it.
    fn tick(self: &Arc<Self>, now: NaiveDateTime) -> Option<TriggerOutcome> {
        let fired = {
            let mut slot = self.trigger.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_mut() {
                Some(trigger) if now >= trigger.next_fire => {
                    trigger.next_fire = trigger.entry.next_after(now);
                    Some(*trigger)
                }
                _ => None,
            }
        };
        let trigger = fired?;
        info!(entry = %trigger.entry, next = %trigger.next_fire, "Daily trigger fired");
        Some(self.start_run())
    }
}

/// Exposes the run triggers to the shell.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(target: Arc<dyn RunTarget>, sink: LogSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                sink,
                running: AtomicBool::new(false),
                trigger: Mutex::new(None),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Starts a run in the background, unless one is already in flight.
    pub fn start_run(&self) -> TriggerOutcome {
        self.inner.start_run()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Runs every day at `hour:minute` local time, replacing any previous schedule.
    pub fn schedule_daily(&self, hour: u32, minute: u32) -> Result<ScheduleEntry, FetchError> {
        let entry = match ScheduleEntry::new(hour, minute) {
            Ok(entry) => entry,
            Err(e) => {
                self.inner.sink.error("Please enter a valid time (HH:MM).");
                return Err(e);
            }
        };
        self.arm(entry, chrono::Local::now().naive_local());
        self.inner.sink.log(format!("Automation scheduled to run daily at {entry}."));
        self.ensure_poller();
        Ok(entry)
    }

    /// Removes the pending daily trigger. A run already in flight keeps going.
    pub fn cancel_schedule(&self) -> bool {
        let removed = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if removed {
            self.inner.sink.log("Schedule cancelled successfully.");
        } else {
            self.inner.sink.log("There is no active schedule to cancel.");
        }
        removed
    }

    pub fn is_schedule_active(&self) -> bool {
        self.active_schedule().is_some()
    }

    pub fn active_schedule(&self) -> Option<ScheduleEntry> {
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.entry)
    }

    /// When the daily trigger fires next.
    pub fn next_fire(&self) -> Option<NaiveDateTime> {
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.next_fire)
    }

    /// Stops the polling loop. Pending triggers no longer fire.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
            debug!("Scheduler poller stopped");
        }
    }

    fn arm(&self, entry: ScheduleEntry, now: NaiveDateTime) {
        let trigger = Trigger {
            entry,
            next_fire: entry.next_after(now),
        };
        *self.inner.trigger.lock().unwrap_or_else(|e| e.into_inner()) = Some(trigger);
        debug!(next = %trigger.next_fire, "Daily trigger armed");
    }

    fn ensure_poller(&self) {
        let mut poller = self.inner.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *poller = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.tick(chrono::Local::now().naive_local());
            }
        }));
        self.inner.sink.log("Scheduling service started.");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
