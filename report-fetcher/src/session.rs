//! Browser session lifecycle and the login handshake.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{Credentials, FormLayout, Timings};
use crate::driver::{BrowserDriver, DriverFactory, LaunchOptions};
use crate::errors::FetchError;
use crate::log_sink::LogSink;
use crate::wait::{wait_for_element, wait_for_element_gone, wait_for_page_ready};

/// One isolated browser session, from launch to [`SessionDriver::release`].
pub struct Session {
    driver: Box<dyn BrowserDriver>,
    released: bool,
}

impl Session {
    pub fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.driver.as_mut()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            // The backend's own Drop still tears down its event loop.
            warn!("Browser session dropped without release");
        }
    }
}

/// Opens, authenticates and terminates browser sessions.
#[derive(Clone)]
pub struct SessionDriver {
    factory: Arc<dyn DriverFactory>,
    options: LaunchOptions,
    login_url: String,
    form: FormLayout,
    timings: Timings,
    sink: LogSink,
}

impl SessionDriver {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        options: LaunchOptions,
        login_url: impl Into<String>,
        form: FormLayout,
        timings: Timings,
        sink: LogSink,
    ) -> Self {
        Self {
            factory,
            options,
            login_url: login_url.into(),
            form,
            timings,
            sink,
        }
    }

    /// Launches a new browser that saves downloads to the configured directory.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<Session, FetchError> {
        let driver = self.factory.launch(&self.options).await?;
        debug!(dir = %self.options.download_dir.display(), "Browser session acquired");
        Ok(Session {
            driver,
            released: false,
        })
    }

    /// Fills and submits the login form.
    ///
    /// Waits until the login form has left the window and the next document has
    /// loaded. The menu reuses the login form's field names, so nothing may be typed
    /// before the login button is gone. Whether the login was accepted shows up when
    /// the report form is looked for.
    #[instrument(skip(self, session, credentials))]
    pub async fn authenticate(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> Result<(), FetchError> {
        self.sink.log("Logging in to the system...");
        let poll = self.timings.poll_interval();
        let driver = session.driver();

        driver.navigate(&self.login_url).await.map_err(|e| match e {
            FetchError::NavigationError(_) => e,
            other => FetchError::NavigationError(format!("{}: {other}", self.login_url)),
        })?;

        wait_for_element(
            driver,
            &self.form.company_field,
            self.timings.element_timeout(),
            poll,
        )
        .await?;

        let fields = [
            (&self.form.company_field, credentials.company_id.as_str()),
            (&self.form.tax_id_field, credentials.tax_id.as_str()),
            (&self.form.username_field, credentials.username.as_str()),
            (&self.form.password_field, credentials.password.as_str()),
        ];
        for (selector, value) in fields {
            if !driver.is_present(selector).await? {
                return Err(FetchError::ElementNotFound(format!(
                    "login field {selector} is missing"
                )));
            }
            driver.type_text(selector, value).await?;
        }
        driver.click(&self.form.login_button).await?;

        let timeout = self.timings.page_ready_timeout();
        wait_for_element_gone(driver, &self.form.login_button, timeout, poll).await?;
        wait_for_page_ready(driver, timeout, poll).await?;
        info!("Login form submitted");
        Ok(())
    }

    /// Terminates the session. Never fails: a quit error is only logged.
    #[instrument(skip(self, session))]
    pub async fn release(&self, mut session: Session) {
        if let Err(e) = session.driver.quit().await {
            warn!("Failed to close browser session: {e}");
        }
        session.released = true;
        debug!("Browser session released");
    }
}
