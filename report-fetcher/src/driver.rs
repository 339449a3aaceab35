//! The remote-control capability a run is driven through.
//!
//! The protocol in [`crate::session`] and [`crate::request`] only talks to these
//! traits, so any automation backend that can find, fill and click form fields and
//! switch between windows can run it. [`crate::chromium`] is the production backend.

use std::path::PathBuf;

use crate::errors::FetchError;
use crate::selector::Selector;

/// Opaque identifier of a browser window or tab.
pub type WindowHandle = String;

/// How a new browser session is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Where the browser must save downloads, without asking.
    pub download_dir: PathBuf,
    pub headless: bool,
    pub browser_executable: Option<PathBuf>,
}

/// One live browser session.
///
/// Every call acts on the active window. None of the methods wait: callers poll
/// [`BrowserDriver::is_present`] through the helpers in [`crate::wait`].
#[async_trait::async_trait]
pub trait BrowserDriver: Send {
    /// Load `url` in the active window.
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError>;

    /// Whether an element matching `selector` exists right now.
    async fn is_present(&mut self, selector: &Selector) -> Result<bool, FetchError>;

    /// Whether the active document finished loading.
    async fn is_page_ready(&mut self) -> Result<bool, FetchError>;

    /// Empty a field the way a user would.
    async fn clear(&mut self, selector: &Selector) -> Result<(), FetchError>;

    /// Type `text` into a field with simulated keystrokes.
    async fn type_text(&mut self, selector: &Selector, text: &str) -> Result<(), FetchError>;

    /// Assign a field's value directly, bypassing keystroke simulation.
    async fn set_value(&mut self, selector: &Selector, value: &str) -> Result<(), FetchError>;

    async fn click(&mut self, selector: &Selector) -> Result<(), FetchError>;

    /// All open windows, oldest first.
    async fn window_handles(&mut self) -> Result<Vec<WindowHandle>, FetchError>;

    async fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<(), FetchError>;

    /// Terminate the session. Must be safe to call on a half-broken session.
    async fn quit(&mut self) -> Result<(), FetchError>;
}

/// Creates a fresh, isolated [`BrowserDriver`] for every session.
#[async_trait::async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, FetchError>;
}
