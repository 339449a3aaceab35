//! The report request form sequence
//!
//! After login the remote system shows a menu where a category code and a report
//! code are typed. Submitting the report code opens a new window with the report
//! parameters: a mode flag and a `DDMMYY` date range. Submitting that form makes the
//! browser download the report into the download directory.

use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use crate::config::{FormLayout, Timings};
use crate::driver::BrowserDriver;
use crate::errors::FetchError;
use crate::finalize::{wait_for_download, DirectorySnapshot, DownloadArtifact};
use crate::log_sink::LogSink;
use crate::period::{derive_range, format_form_date, DateRange, ReportingPeriod};
use crate::selector::Selector;
use crate::session::Session;
use crate::wait::{wait_for_element, wait_for_new_window};

/// Drives the report form for one period inside an authenticated session.
#[derive(Debug, Clone)]
pub struct ReportRequestExecutor {
    form: FormLayout,
    timings: Timings,
    download_dir: PathBuf,
    sink: LogSink,
}

impl ReportRequestExecutor {
    pub fn new(form: FormLayout, timings: Timings, download_dir: PathBuf, sink: LogSink) -> Self {
        Self {
            form,
            timings,
            download_dir,
            sink,
        }
    }

    /// Requests the report for `period` and waits for its download to complete.
    ///
    /// Errors are returned as they happen; closing the session is up to the caller.
    #[instrument(skip(self, session, period), fields(period = %period))]
    pub async fn request_download(
        &self,
        session: &mut Session,
        period: &ReportingPeriod,
        now: NaiveDate,
    ) -> Result<DownloadArtifact, FetchError> {
        self.sink.log(format!("Starting processing for {}", period.display_name()));
        let driver = session.driver();

        self.open_report_window(driver).await?;

        self.wait_for(driver, &self.form.mode_field).await?;
        driver.clear(&self.form.mode_field).await?;
        driver
            .type_text(&self.form.mode_field, &self.form.mode_value)
            .await?;

        let range = derive_range(period, now);
        self.log_range(period, &range);
        self.fill_range(driver, &range).await?;

        let snapshot = DirectorySnapshot::capture(&self.download_dir)?;
        driver.click(&self.form.submit_button).await?;
        info!("Report requested, waiting for download");

        let artifact = wait_for_download(
            &snapshot,
            &self.download_dir,
            self.timings.download_timeout(),
            self.timings.poll_interval(),
        )
        .await?;
        debug!(path = %artifact.path.display(), "Report downloaded");
        Ok(artifact)
    }

    /// Types the category and report codes, then switches to the window they open.
    async fn open_report_window(&self, driver: &mut dyn BrowserDriver) -> Result<(), FetchError> {
        self.wait_for(driver, &self.form.option_field).await?;
        driver.clear(&self.form.option_field).await?;
        driver
            .type_text(&self.form.option_field, &self.form.category_code)
            .await?;

        let known_windows = driver.window_handles().await?.len();

        self.wait_for(driver, &self.form.report_field).await?;
        driver
            .type_text(&self.form.report_field, &self.form.report_code)
            .await?;

        let newest = wait_for_new_window(
            driver,
            known_windows,
            self.timings.new_window_timeout(),
            self.timings.poll_interval(),
        )
        .await?;
        driver.switch_to_window(&newest).await?;
        debug!(window = %newest, "Switched to report window");
        Ok(())
    }

    async fn fill_range(
        &self,
        driver: &mut dyn BrowserDriver,
        range: &DateRange,
    ) -> Result<(), FetchError> {
        let start = &self.form.start_date_field;
        self.wait_for(driver, start).await?;
        driver.clear(start).await?;
        driver
            .type_text(start, &format_form_date(range.start))
            .await?;

        // The end field keeps a prefilled date that keystroke clearing leaves behind.
        let end = &self.form.end_date_field;
        self.wait_for(driver, end).await?;
        driver.set_value(end, "").await?;
        driver.type_text(end, &format_form_date(range.end)).await?;
        Ok(())
    }

    async fn wait_for(
        &self,
        driver: &mut dyn BrowserDriver,
        selector: &Selector,
    ) -> Result<(), FetchError> {
        wait_for_element(
            driver,
            selector,
            self.timings.element_timeout(),
            self.timings.poll_interval(),
        )
        .await
    }

    fn log_range(&self, period: &ReportingPeriod, range: &DateRange) {
        let end = range.end.format("%d/%m/%y");
        if period.is_current_month {
            self.sink.log(format!("Using current date ({end}) for the current month"));
        } else {
            self.sink.log(format!("Using last day of the month ({end})"));
        }
    }
}
