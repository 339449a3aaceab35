//! Running the full login → request → finalize sequence over a set of periods.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::{Credentials, FetcherConfig};
use crate::driver::{DriverFactory, LaunchOptions};
use crate::errors::FetchError;
use crate::finalize::{DownloadArtifact, DownloadFinalizer};
use crate::log_sink::LogSink;
use crate::period::{compute_periods, format_label, ReportingPeriod};
use crate::request::ReportRequestExecutor;
use crate::session::{Session, SessionDriver};

/// What a run does after one period fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the remaining periods and report the failure to the caller.
    #[default]
    HaltOnFirstFailure,
    /// Record the failure and carry on with the next period.
    ContinueOnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodStatus {
    Succeeded(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodOutcome {
    pub period: ReportingPeriod,
    pub label: String,
    pub status: PeriodStatus,
}

/// Per-period results of one run, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<PeriodOutcome>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &PeriodOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PeriodStatus::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, PeriodStatus::Succeeded(_)))
    }

    /// Paths of the finalized artifacts.
    pub fn artifacts(&self) -> Vec<&PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                PeriodStatus::Succeeded(path) => Some(path),
                _ => None,
            })
            .collect()
    }
}

/// Something a trigger can start.
#[async_trait::async_trait]
pub trait RunTarget: Send + Sync {
    /// Runs every period due right now.
    async fn run_once(&self) -> Result<RunReport, FetchError>;
}

pub struct RunOrchestrator {
    sessions: SessionDriver,
    executor: ReportRequestExecutor,
    finalizer: DownloadFinalizer,
    credentials: Credentials,
    download_dir: PathBuf,
    policy: FailurePolicy,
    sink: LogSink,
}

impl RunOrchestrator {
    pub fn new(
        config: &FetcherConfig,
        credentials: Credentials,
        factory: Arc<dyn DriverFactory>,
        sink: LogSink,
    ) -> Self {
        let options = LaunchOptions {
            download_dir: config.download_dir.clone(),
            headless: config.headless,
            browser_executable: config.browser_executable.clone(),
        };
        Self {
            sessions: SessionDriver::new(
                factory,
                options,
                config.login_url.clone(),
                config.form.clone(),
                config.timings.clone(),
                sink.clone(),
            ),
            executor: ReportRequestExecutor::new(
                config.form.clone(),
                config.timings.clone(),
                config.download_dir.clone(),
                sink.clone(),
            ),
            finalizer: DownloadFinalizer::new(sink.clone()),
            credentials,
            download_dir: config.download_dir.clone(),
            policy: config.failure_policy,
            sink,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Processes `periods` in order, one fresh browser session each.
    ///
    /// With [`FailurePolicy::HaltOnFirstFailure`] the first error is returned and the
    /// remaining periods are never attempted.
    #[instrument(skip(self, periods), fields(count = periods.len()))]
    pub async fn run(
        &self,
        periods: &[ReportingPeriod],
        now: NaiveDate,
    ) -> Result<RunReport, FetchError> {
        self.sink.log("Starting automation process...");
        let result = self.run_periods(periods, now).await;
        if let Err(e) = &result {
            error!("Run aborted: {e}");
            self.sink.error(e.to_string());
        }
        self.sink.log("Process finished.");
        result
    }

    /// Runs the current month and the two before it.
    pub async fn run_current(&self) -> Result<RunReport, FetchError> {
        let now = chrono::Local::now().date_naive();
        let periods = compute_periods(now);
        self.run(&periods, now).await
    }

    async fn run_periods(
        &self,
        periods: &[ReportingPeriod],
        now: NaiveDate,
    ) -> Result<RunReport, FetchError> {
        let mut report = RunReport::default();

        for (index, period) in periods.iter().enumerate() {
            self.sink.log(format!("Processing month: {}", period.display_name()));
            let label = format_label(period);

            match self.process_period(period, now).await {
                Ok(path) => report.outcomes.push(PeriodOutcome {
                    period: *period,
                    label,
                    status: PeriodStatus::Succeeded(path),
                }),
                Err(e) => match self.policy {
                    FailurePolicy::HaltOnFirstFailure => {
                        info!(
                            skipped = periods.len() - index - 1,
                            "Halting run after failure in {label}"
                        );
                        return Err(e);
                    }
                    FailurePolicy::ContinueOnFailure => {
                        self.sink.error(format!("{label}: {e}"));
                        report.outcomes.push(PeriodOutcome {
                            period: *period,
                            label,
                            status: PeriodStatus::Failed(e.to_string()),
                        });
                    }
                },
            }
        }

        Ok(report)
    }

    /// acquire → authenticate → request → finalize, always followed by release.
    async fn process_period(
        &self,
        period: &ReportingPeriod,
        now: NaiveDate,
    ) -> Result<PathBuf, FetchError> {
        let mut session = self.sessions.acquire().await?;
        let result = self.drive_session(&mut session, period, now).await;
        self.sessions.release(session).await;
        self.sink.log(format!("Processing of month {} finished.", period.display_name()));
        result
    }

    async fn drive_session(
        &self,
        session: &mut Session,
        period: &ReportingPeriod,
        now: NaiveDate,
    ) -> Result<PathBuf, FetchError> {
        self.sessions.authenticate(session, &self.credentials).await?;
        let downloaded = self.executor.request_download(session, period, now).await?;
        let label = format_label(period);
        self.sink.log(format!("Renaming file to: {label}"));
        let finalized = self.finalizer.finalize(&self.download_dir, &label)?;
        if renamed_other_file(&downloaded, &finalized) {
            warn!(
                downloaded = %downloaded.path.display(),
                finalized = %finalized.display(),
                "Finalized file is not the one just downloaded"
            );
            self.sink.log(format!(
                "Warning: {} was downloaded, but a newer file was renamed to {label}.",
                downloaded.path.display()
            ));
        }
        Ok(finalized)
    }
}

/// Whether finalizing picked some other file than the detected download, which
/// then still sits in the directory under its own name.
fn renamed_other_file(downloaded: &DownloadArtifact, finalized: &Path) -> bool {
    downloaded.path != finalized && downloaded.path.exists()
}

#[async_trait::async_trait]
impl RunTarget for RunOrchestrator {
    async fn run_once(&self) -> Result<RunReport, FetchError> {
        self.run_current().await
    }
}
