//! Chromium backend over the DevTools protocol.
//!
//! Each session launches its own browser with a throwaway profile directory, so no
//! cookies or state leak between periods. Downloads are allowed without a prompt
//! and land directly in the configured download directory.

use std::path::PathBuf;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::driver::{BrowserDriver, DriverFactory, LaunchOptions, WindowHandle};
use crate::errors::FetchError;
use crate::selector::Selector;

fn cdp_error(e: CdpError) -> FetchError {
    FetchError::Browser(e.to_string())
}

/// Launches one [`ChromiumDriver`] per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumFactory;

#[async_trait::async_trait]
impl DriverFactory for ChromiumFactory {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, FetchError> {
        Ok(Box::new(ChromiumDriver::launch(options).await?))
    }
}

pub struct ChromiumDriver {
    browser: Browser,
    handler_task: JoinHandle<()>,
    /// Known windows in the order they were first seen.
    windows: Vec<(WindowHandle, Page)>,
    active: usize,
    profile_dir: PathBuf,
}

impl ChromiumDriver {
    #[instrument(skip(options), fields(dir = %options.download_dir.display()))]
    pub async fn launch(options: &LaunchOptions) -> Result<Self, FetchError> {
        let download_dir = std::fs::canonicalize(&options.download_dir)?;
        let profile_dir = std::env::temp_dir().join(format!("report-fetcher-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&profile_dir)?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-popup-blocking");
        if let Some(executable) = &options.browser_executable {
            builder = builder.chrome_executable(executable);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(FetchError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            FetchError::Browser(format!(
                "failed to launch browser (is Chrome or Chromium installed?): {e}"
            ))
        })?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().to_string())
            .build()
            .map_err(FetchError::Browser)?;
        browser.execute(behavior).await.map_err(cdp_error)?;

        let page = browser.new_page("about:blank").await.map_err(cdp_error)?;
        let handle = page.target_id().inner().clone();
        info!(profile = %profile_dir.display(), "Browser launched");

        Ok(Self {
            browser,
            handler_task,
            windows: vec![(handle, page)],
            active: 0,
            profile_dir,
        })
    }

    fn active_page(&self) -> Result<&Page, FetchError> {
        self.windows
            .get(self.active)
            .map(|(_, page)| page)
            .ok_or_else(|| FetchError::Browser("no active window".into()))
    }

    async fn eval_bool(&self, script: String) -> Result<bool, FetchError> {
        let page = self.active_page()?;
        page.evaluate(script)
            .await
            .map_err(cdp_error)?
            .into_value::<bool>()
            .map_err(|e| FetchError::Browser(format!("unexpected script result: {e}")))
    }

    /// Runs `body` with `el` bound to the element; fails when it does not exist.
    async fn with_element(&self, selector: &Selector, body: &str) -> Result<(), FetchError> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; {body} return true; }})()",
            selector.to_js_lookup()
        );
        if self.eval_bool(script).await? {
            Ok(())
        } else {
            Err(FetchError::ElementNotFound(selector.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        let page = self.active_page()?;
        page.goto(url)
            .await
            .map_err(|e| FetchError::NavigationError(format!("{url}: {e}")))?;
        Ok(())
    }

    async fn is_present(&mut self, selector: &Selector) -> Result<bool, FetchError> {
        let script = format!("{} !== null", selector.to_js_lookup());
        // Evaluation fails while a document is being replaced; that is "not yet".
        Ok(self.eval_bool(script).await.unwrap_or_else(|e| {
            debug!("Presence check for {selector} failed: {e}");
            false
        }))
    }

    async fn is_page_ready(&mut self) -> Result<bool, FetchError> {
        Ok(self
            .eval_bool("document.readyState === 'complete'".to_string())
            .await
            .unwrap_or(false))
    }

    async fn clear(&mut self, selector: &Selector) -> Result<(), FetchError> {
        self.with_element(
            selector,
            "el.focus(); el.value = ''; \
             el.dispatchEvent(new Event('input', { bubbles: true })); \
             el.dispatchEvent(new Event('change', { bubbles: true }));",
        )
        .await
    }

    async fn type_text(&mut self, selector: &Selector, text: &str) -> Result<(), FetchError> {
        let page = self.active_page()?;
        let element = page
            .find_element(selector.to_css())
            .await
            .map_err(|e| FetchError::ElementNotFound(format!("{selector}: {e}")))?;
        element.focus().await.map_err(cdp_error)?;
        element.type_str(text).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn set_value(&mut self, selector: &Selector, value: &str) -> Result<(), FetchError> {
        let literal = serde_json::to_string(value)
            .map_err(|e| FetchError::Browser(format!("cannot encode value: {e}")))?;
        self.with_element(selector, &format!("el.value = {literal};"))
            .await
    }

    async fn click(&mut self, selector: &Selector) -> Result<(), FetchError> {
        self.with_element(selector, "el.click();").await
    }

    async fn window_handles(&mut self) -> Result<Vec<WindowHandle>, FetchError> {
        let pages = self.browser.pages().await.map_err(cdp_error)?;
        for page in pages {
            let handle = page.target_id().inner().clone();
            if !self.windows.iter().any(|(known, _)| *known == handle) {
                debug!(window = %handle, "Discovered window");
                self.windows.push((handle, page));
            }
        }
        Ok(self.windows.iter().map(|(handle, _)| handle.clone()).collect())
    }

    async fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<(), FetchError> {
        let index = self
            .windows
            .iter()
            .position(|(known, _)| known == handle)
            .ok_or_else(|| FetchError::ElementNotFound(format!("window {handle}")))?;
        self.active = index;
        self.windows[index]
            .1
            .bring_to_front()
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), FetchError> {
        let closed = self.browser.close().await.map_err(cdp_error);
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {e}");
        }
        self.handler_task.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!("Could not remove profile {}: {e}", self.profile_dir.display());
        }
        closed.map(|_| ())
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
