//! Scripted stand-in for the remote system and its browser.
//!
//! Each launched session walks the same pages the real system shows: login,
//! menu, and the report window opened by typing the report code. Submitting the
//! report form writes a file into the download directory, like a real download.
//!
//! Page changes can be made to land a few driver calls after the click that caused
//! them, the way a real browser keeps showing the old document while the next one
//! loads.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use report_fetcher::config::{ENV_COMPANY_ID, ENV_PASSWORD, ENV_TAX_ID, ENV_USERNAME};
use report_fetcher::{
    BrowserDriver, Credentials, DriverFactory, FetchError, FetcherConfig, LaunchOptions,
    LogSink, Selector, Timings, WindowHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The login page cannot be loaded.
    LoginPageDown,
    /// The menu never shows the option field.
    MissingMenu,
    /// The login click leaves the login form on screen, as for bad credentials.
    LoginRejected,
    /// Typing the report code does not open the report window.
    NoReportWindow,
    /// Submitting the report form never produces a file.
    NoDownload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Blank,
    Login,
    Menu,
    ReportForm,
}

impl Screen {
    fn fields(&self) -> &'static [&'static str] {
        match self {
            Screen::Blank => &[],
            Screen::Login => &["name:f1", "name:f2", "name:f3", "name:f4", "id:5"],
            Screen::Menu => &["name:f2", "name:f3"],
            Screen::ReportForm => &["id:17", "id:14", "id:15", "id:20"],
        }
    }
}

/// Shared state of every session launched by a [`FakeFactory`].
pub struct FakeRemote {
    pub download_dir: PathBuf,
    faults: Mutex<HashMap<usize, Fault>>,
    navigation_delay: AtomicUsize,
    launches: AtomicUsize,
    quits: AtomicUsize,
    events: Mutex<Vec<String>>,
    screen_events: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new(download_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            download_dir: download_dir.to_path_buf(),
            faults: Mutex::new(HashMap::new()),
            navigation_delay: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            screen_events: Mutex::new(Vec::new()),
        })
    }

    /// Keeps the old page on screen for `calls` more driver calls after a click
    /// that navigates.
    pub fn delay_navigation(&self, calls: usize) {
        self.navigation_delay.store(calls, Ordering::SeqCst);
    }

    /// Leaves an old, never finished browser download in the download directory.
    pub fn leave_stale_partial(&self) -> PathBuf {
        let path = self.download_dir.join("Unconfirmed 1234.crdownload");
        std::fs::write(&path, "partial").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(1_600_000_000))
            .unwrap();
        path
    }

    /// Makes the `session`-th launched browser (1-based) misbehave.
    pub fn fail_session(&self, session: usize, fault: Fault) {
        self.faults.lock().unwrap().insert(session, fault);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events of one session, without the session prefix.
    pub fn session_events(&self, session: usize) -> Vec<String> {
        let prefix = format!("s{session} ");
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Events of one session, each prefixed with the screen it happened on.
    pub fn screen_events(&self, session: usize) -> Vec<String> {
        let prefix = format!("s{session} ");
        self.screen_events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn record(&self, session: usize, screen: Screen, event: String) {
        self.screen_events
            .lock()
            .unwrap()
            .push(format!("s{session} {screen:?} {event}"));
        self.events.lock().unwrap().push(format!("s{session} {event}"));
    }
}

pub struct FakeFactory(pub Arc<FakeRemote>);

#[async_trait::async_trait]
impl DriverFactory for FakeFactory {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, FetchError> {
        assert_eq!(options.download_dir, self.0.download_dir);
        let session = self.0.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let fault = self.0.faults.lock().unwrap().get(&session).copied();
        self.0.record(session, Screen::Blank, "launch".into());
        Ok(Box::new(FakeBrowser {
            remote: self.0.clone(),
            session,
            fault,
            windows: vec![("main".into(), Screen::Blank)],
            active: 0,
            pending: None,
        }))
    }
}

struct FakeBrowser {
    remote: Arc<FakeRemote>,
    session: usize,
    fault: Option<Fault>,
    windows: Vec<(WindowHandle, Screen)>,
    active: usize,
    /// Screen still loading in the active window, and the calls left until it shows.
    pending: Option<(usize, Screen)>,
}

impl FakeBrowser {
    fn screen(&self) -> Screen {
        self.windows[self.active].1
    }

    fn set_screen(&mut self, screen: Screen) {
        self.windows[self.active].1 = screen;
    }

    fn navigate_to(&mut self, screen: Screen) {
        match self.remote.navigation_delay.load(Ordering::SeqCst) {
            0 => self.set_screen(screen),
            calls => self.pending = Some((calls, screen)),
        }
    }

    /// Called at the start of every driver call.
    fn settle(&mut self) {
        match self.pending.take() {
            Some((0, screen)) => self.set_screen(screen),
            Some((calls, screen)) => self.pending = Some((calls - 1, screen)),
            None => {}
        }
    }

    fn present(&self, selector: &Selector) -> bool {
        if self.screen() == Screen::Menu
            && self.fault == Some(Fault::MissingMenu)
            && *selector == Selector::name("f2")
        {
            return false;
        }
        self.screen().fields().contains(&selector.to_string().as_str())
    }

    fn require(&self, selector: &Selector) -> Result<(), FetchError> {
        if self.present(selector) {
            Ok(())
        } else {
            Err(FetchError::ElementNotFound(selector.to_string()))
        }
    }

    fn record(&self, event: String) {
        self.remote.record(self.session, self.screen(), event);
    }

    fn download(&self) -> Result<(), FetchError> {
        let path = self
            .remote
            .download_dir
            .join(format!("relatorio_{}.xlsx", self.session));
        std::fs::write(&path, self.session.to_string())?;
        File::options()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now() + Duration::from_secs(self.session as u64))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        self.settle();
        if self.fault == Some(Fault::LoginPageDown) {
            return Err(FetchError::NavigationError(format!("{url}: connection refused")));
        }
        self.record(format!("navigate {url}"));
        self.set_screen(Screen::Login);
        Ok(())
    }

    async fn is_present(&mut self, selector: &Selector) -> Result<bool, FetchError> {
        self.settle();
        Ok(self.present(selector))
    }

    async fn is_page_ready(&mut self) -> Result<bool, FetchError> {
        self.settle();
        Ok(true)
    }

    async fn clear(&mut self, selector: &Selector) -> Result<(), FetchError> {
        self.settle();
        self.require(selector)?;
        self.record(format!("clear {selector}"));
        Ok(())
    }

    async fn type_text(&mut self, selector: &Selector, text: &str) -> Result<(), FetchError> {
        self.settle();
        self.require(selector)?;
        self.record(format!("type {selector}={text}"));
        if self.screen() == Screen::Menu
            && *selector == Selector::name("f3")
            && self.fault != Some(Fault::NoReportWindow)
        {
            self.windows.push(("report".into(), Screen::ReportForm));
        }
        Ok(())
    }

    async fn set_value(&mut self, selector: &Selector, value: &str) -> Result<(), FetchError> {
        self.settle();
        self.require(selector)?;
        self.record(format!("set {selector}={value}"));
        Ok(())
    }

    async fn click(&mut self, selector: &Selector) -> Result<(), FetchError> {
        self.settle();
        self.require(selector)?;
        self.record(format!("click {selector}"));
        match (self.screen(), selector.to_string().as_str()) {
            (Screen::Login, "id:5") if self.fault != Some(Fault::LoginRejected) => {
                self.navigate_to(Screen::Menu)
            }
            (Screen::ReportForm, "id:20") if self.fault != Some(Fault::NoDownload) => {
                self.download()?
            }
            _ => {}
        }
        Ok(())
    }

    async fn window_handles(&mut self) -> Result<Vec<WindowHandle>, FetchError> {
        self.settle();
        Ok(self.windows.iter().map(|(h, _)| h.clone()).collect())
    }

    async fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<(), FetchError> {
        self.settle();
        self.active = self
            .windows
            .iter()
            .position(|(h, _)| h == handle)
            .ok_or_else(|| FetchError::ElementNotFound(format!("window {handle}")))?;
        self.record(format!("switch {handle}"));
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), FetchError> {
        self.remote.quits.fetch_add(1, Ordering::SeqCst);
        self.record("quit".into());
        Ok(())
    }
}

pub fn fast_timings() -> Timings {
    Timings {
        element_timeout_ms: 200,
        page_ready_timeout_ms: 200,
        new_window_timeout_ms: 200,
        download_timeout_ms: 500,
        poll_interval_ms: 5,
    }
}

pub fn test_config(download_dir: &Path) -> FetcherConfig {
    FetcherConfig {
        download_dir: download_dir.to_path_buf(),
        login_url: "https://reports.example.test/login".into(),
        timings: fast_timings(),
        ..FetcherConfig::default()
    }
}

pub fn test_credentials() -> Credentials {
    Credentials::from_lookup(|key| {
        let value = match key {
            k if k == ENV_COMPANY_ID => "ACME",
            k if k == ENV_TAX_ID => "12345678000199",
            k if k == ENV_USERNAME => "joana",
            k if k == ENV_PASSWORD => "s3cret",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
}

pub type Lines = Arc<Mutex<Vec<String>>>;

/// A sink that keeps every line for later assertions.
pub fn capture_sink() -> (LogSink, Lines) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let sink = LogSink::new(move |line| captured.lock().unwrap().push(line.to_string()));
    (sink, lines)
}

/// Routes `tracing` output of the code under test to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("report_fetcher=debug")
        .with_test_writer()
        .try_init();
}
