//! Configuration for a fetcher: where downloads land, how the remote forms are
//! laid out, how long each bounded wait may take, and the login credentials.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::FetchError;
use crate::orchestrator::FailurePolicy;
use crate::selector::Selector;

pub const DEFAULT_LOGIN_URL: &str = "https://sistema.ssw.inf.br/bin/ssw0422";

/// Default env file holding the credentials.
pub const DEFAULT_ENV_FILE: &str = "credentials.env";

pub const ENV_COMPANY_ID: &str = "REPORT_COMPANY_ID";
pub const ENV_TAX_ID: &str = "REPORT_TAX_ID";
pub const ENV_USERNAME: &str = "REPORT_USERNAME";
pub const ENV_PASSWORD: &str = "REPORT_PASSWORD";

/// Top-level configuration, every field has a default so a partial JSON file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub download_dir: PathBuf,
    pub login_url: String,
    pub headless: bool,
    pub browser_executable: Option<PathBuf>,
    pub failure_policy: FailurePolicy,
    pub form: FormLayout,
    pub timings: Timings,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            headless: true,
            browser_executable: None,
            failure_policy: FailurePolicy::default(),
            form: FormLayout::default(),
            timings: Timings::default(),
        }
    }
}

impl FetcherConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, FetchError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FetchError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            FetchError::ConfigError(format!("invalid config {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded fetcher config");
        Ok(config)
    }

    /// Checks the values a run cannot work without and creates the download directory.
    pub fn prepare(&self) -> Result<(), FetchError> {
        if self.login_url.trim().is_empty() {
            return Err(FetchError::ConfigError("login_url is empty".into()));
        }
        if self.download_dir.exists() && !self.download_dir.is_dir() {
            return Err(FetchError::ConfigError(format!(
                "download_dir {} is not a directory",
                self.download_dir.display()
            )));
        }
        std::fs::create_dir_all(&self.download_dir)?;
        Ok(())
    }
}

/// Selectors and fixed codes of the remote login and report forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormLayout {
    pub company_field: Selector,
    pub tax_id_field: Selector,
    pub username_field: Selector,
    pub password_field: Selector,
    pub login_button: Selector,
    pub option_field: Selector,
    pub category_code: String,
    pub report_field: Selector,
    pub report_code: String,
    pub mode_field: Selector,
    pub mode_value: String,
    pub start_date_field: Selector,
    pub end_date_field: Selector,
    pub submit_button: Selector,
}

impl Default for FormLayout {
    fn default() -> Self {
        Self {
            company_field: Selector::name("f1"),
            tax_id_field: Selector::name("f2"),
            username_field: Selector::name("f3"),
            password_field: Selector::name("f4"),
            login_button: Selector::id("5"),
            option_field: Selector::name("f2"),
            category_code: "CTA".to_string(),
            report_field: Selector::name("f3"),
            report_code: "103".to_string(),
            mode_field: Selector::id("17"),
            mode_value: "e".to_string(),
            start_date_field: Selector::id("14"),
            end_date_field: Selector::id("15"),
            submit_button: Selector::id("20"),
        }
    }
}

/// Upper bounds for every wait in a run, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Waiting for a form field to appear
    pub element_timeout_ms: u64,
    /// Waiting for a page to finish loading after login
    pub page_ready_timeout_ms: u64,
    /// Waiting for the report window to open
    pub new_window_timeout_ms: u64,
    /// Waiting for the report file to finish downloading
    pub download_timeout_ms: u64,
    /// Delay between two checks of any condition
    pub poll_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            element_timeout_ms: 10_000,
            page_ready_timeout_ms: 15_000,
            new_window_timeout_ms: 15_000,
            download_timeout_ms: 120_000,
            poll_interval_ms: 250,
        }
    }
}

impl Timings {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.page_ready_timeout_ms)
    }

    pub fn new_window_timeout(&self) -> Duration {
        Duration::from_millis(self.new_window_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// The four values the login form asks for.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub company_id: String,
    pub tax_id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("company_id", &self.company_id)
            .field("tax_id", &self.tax_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Reads the credentials from the process environment.
    pub fn from_env() -> Result<Self, FetchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the credentials through `lookup`; every value must be present and non-blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FetchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut read = |key: &'static str| match lookup(key).map(|v| v.trim().to_string()) {
            Some(value) if !value.is_empty() => value,
            _ => {
                missing.push(key);
                String::new()
            }
        };

        let credentials = Self {
            company_id: read(ENV_COMPANY_ID),
            tax_id: read(ENV_TAX_ID),
            username: read(ENV_USERNAME),
            password: read(ENV_PASSWORD),
        };

        if missing.is_empty() {
            Ok(credentials)
        } else {
            Err(FetchError::ConfigError(format!(
                "missing credential values: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Loads `KEY=VALUE` pairs from an env file into the process environment.
///
/// Returns `Ok(false)` when the file does not exist; variables already set in the
/// environment win over the file.
pub fn load_env_file(path: &Path) -> Result<bool, FetchError> {
    if !path.exists() {
        debug!(path = %path.display(), "No env file found");
        return Ok(false);
    }
    dotenvy::from_path(path).map_err(|e| {
        FetchError::ConfigError(format!("cannot load env file {}: {e}", path.display()))
    })?;
    Ok(true)
}
