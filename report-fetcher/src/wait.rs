//! Bounded waits.
//!
//! Every pause in a run waits for a concrete condition and gives up with an error
//! once its deadline passes.

use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::driver::{BrowserDriver, WindowHandle};
use crate::errors::FetchError;
use crate::selector::Selector;

/// A point in time after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Waits until `selector` is present in the active window.
#[instrument(level = "debug", skip(driver, timeout, poll))]
pub async fn wait_for_element(
    driver: &mut dyn BrowserDriver,
    selector: &Selector,
    timeout: Duration,
    poll: Duration,
) -> Result<(), FetchError> {
    let deadline = Deadline::after(timeout);
    loop {
        if driver.is_present(selector).await? {
            debug!(elapsed = ?deadline.elapsed(), "Element {selector} present");
            return Ok(());
        }
        if deadline.expired() {
            return Err(FetchError::ElementNotFound(format!(
                "{selector} did not appear within {timeout:?}"
            )));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Waits until `selector` is no longer present in the active window, which is how
/// a form submission is seen to have left its page.
#[instrument(level = "debug", skip(driver, timeout, poll))]
pub async fn wait_for_element_gone(
    driver: &mut dyn BrowserDriver,
    selector: &Selector,
    timeout: Duration,
    poll: Duration,
) -> Result<(), FetchError> {
    let deadline = Deadline::after(timeout);
    loop {
        if !driver.is_present(selector).await? {
            debug!(elapsed = ?deadline.elapsed(), "Element {selector} gone");
            return Ok(());
        }
        if deadline.expired() {
            return Err(FetchError::NavigationError(format!(
                "page still shows {selector} after {timeout:?}"
            )));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Waits until the active document reports it finished loading.
#[instrument(level = "debug", skip(driver, timeout, poll))]
pub async fn wait_for_page_ready(
    driver: &mut dyn BrowserDriver,
    timeout: Duration,
    poll: Duration,
) -> Result<(), FetchError> {
    let deadline = Deadline::after(timeout);
    loop {
        if driver.is_page_ready().await? {
            return Ok(());
        }
        if deadline.expired() {
            return Err(FetchError::NavigationError(format!(
                "page did not finish loading within {timeout:?}"
            )));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Waits until more than `known` windows are open and returns the newest one.
#[instrument(level = "debug", skip(driver, timeout, poll))]
pub async fn wait_for_new_window(
    driver: &mut dyn BrowserDriver,
    known: usize,
    timeout: Duration,
    poll: Duration,
) -> Result<WindowHandle, FetchError> {
    let deadline = Deadline::after(timeout);
    loop {
        let handles = driver.window_handles().await?;
        if handles.len() > known {
            if let Some(newest) = handles.last() {
                debug!(count = handles.len(), "New window opened");
                return Ok(newest.clone());
            }
        }
        if deadline.expired() {
            return Err(FetchError::ElementNotFound(format!(
                "no new window opened within {timeout:?}"
            )));
        }
        tokio::time::sleep(poll).await;
    }
}
