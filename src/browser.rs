use crate::config::Config;
use crate::mode::Mode;
use anyhow::{Context, Result};
use base64::Engine;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Extra pixels around the requested canvas; absorbs sub-pixel rendering
/// fringes at the viewport edge.
pub const VIEWPORT_BUFFER: u32 = 5;

/// Pooled browsers are kept alive well past the per-capture work so reuse
/// actually gets a live process.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(300);

/// Headless-browser collaborator. Sessions are pooled per viewport size:
/// a capture first tries to take an idle session of the right geometry and
/// only launches a fresh browser when none is free. Release is owned by an
/// RAII lease so every exit path (success, selector miss, screenshot error)
/// gives the session back or tears it down.
pub struct BrowserPool {
    idle: Mutex<Vec<IdleSession>>,
    reuse_sessions: bool,
    max_idle: usize,
    sandbox: bool,
}

struct IdleSession {
    browser: Browser,
    viewport: (u32, u32),
}

impl BrowserPool {
    pub fn new(config: &Config) -> Self {
        BrowserPool {
            idle: Mutex::new(Vec::new()),
            reuse_sessions: config.use_browser_sessions,
            max_idle: config.browser_max_idle_sessions,
            sandbox: config.browser_sandbox,
        }
    }

    /// Screenshot locally produced markup. The page is loaded through a
    /// base64 data: URL, which is why callers must absolutize root-relative
    /// asset links first.
    pub fn capture_markup(
        &self,
        html: &str,
        mode: &Mode,
        selector: Option<String>,
        quality: u32,
    ) -> Result<Vec<u8>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(html);
        let url = format!("data:text/html;base64,{encoded}");
        self.capture(&url, mode, selector, quality)
    }

    /// Navigate to an external page and screenshot it.
    pub fn capture_url(
        &self,
        url: &str,
        mode: &Mode,
        selector: Option<String>,
        quality: u32,
    ) -> Result<Vec<u8>> {
        self.capture(url, mode, selector, quality)
    }

    fn capture(
        &self,
        url: &str,
        mode: &Mode,
        selector: Option<String>,
        quality: u32,
    ) -> Result<Vec<u8>> {
        let viewport = (
            mode.width + VIEWPORT_BUFFER,
            mode.height + VIEWPORT_BUFFER,
        );
        let mut lease = self.acquire(viewport)?;
        let result = capture_page(lease.browser(), url, selector.as_deref(), quality);
        if result.is_err() {
            // failed sessions are never recycled
            lease.discard();
        }
        result
    }

    fn acquire(&self, viewport: (u32, u32)) -> Result<SessionLease<'_>> {
        if let Some(session) = self.take_idle(viewport) {
            debug!(width = viewport.0, height = viewport.1, "reusing idle browser session");
            return Ok(SessionLease {
                pool: self,
                browser: Some(session.browser),
                viewport,
            });
        }
        let options = LaunchOptions {
            window_size: Some(viewport),
            sandbox: self.sandbox,
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            ..Default::default()
        };
        let browser = Browser::new(options).context("browser launch failed")?;
        Ok(SessionLease {
            pool: self,
            browser: Some(browser),
            viewport,
        })
    }

    fn take_idle(&self, viewport: (u32, u32)) -> Option<IdleSession> {
        let mut idle = self.idle.lock().ok()?;
        let position = idle.iter().position(|session| session.viewport == viewport)?;
        Some(idle.swap_remove(position))
    }

    fn release(&self, browser: Browser, viewport: (u32, u32)) {
        if !self.reuse_sessions {
            return;
        }
        let Ok(mut idle) = self.idle.lock() else {
            return;
        };
        if idle.len() < self.max_idle {
            idle.push(IdleSession { browser, viewport });
        }
    }
}

/// Scoped session ownership: dropping the lease either recycles the browser
/// into the pool or closes it, so no branch can leak a session.
struct SessionLease<'a> {
    pool: &'a BrowserPool,
    browser: Option<Browser>,
    viewport: (u32, u32),
}

impl SessionLease<'_> {
    fn browser(&self) -> &Browser {
        self.browser.as_ref().expect("lease holds a browser")
    }

    fn discard(&mut self) {
        self.browser = None;
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(browser) = self.browser.take() {
            self.pool.release(browser, self.viewport);
        }
    }
}

fn capture_page(
    browser: &Browser,
    url: &str,
    selector: Option<&str>,
    quality: u32,
) -> Result<Vec<u8>> {
    let tab = browser.new_tab().context("tab open failed")?;
    let result = screenshot_tab(&tab, url, selector, quality);
    if let Err(err) = tab.close(true) {
        debug!(error = ?err, "tab close failed");
    }
    result
}

fn screenshot_tab(
    tab: &Tab,
    url: &str,
    selector: Option<&str>,
    quality: u32,
) -> Result<Vec<u8>> {
    tab.navigate_to(url)
        .context("navigation failed")?
        .wait_until_navigated()
        .context("page never settled")?;
    if let Some(selector) = selector {
        match tab.wait_for_element(selector) {
            Ok(element) => {
                return element
                    .capture_screenshot(CaptureScreenshotFormatOption::Jpeg)
                    .context("element screenshot failed");
            }
            Err(err) => {
                warn!(selector, error = ?err, "target element not found; capturing whole page");
            }
        }
    }
    tab.capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(quality), None, true)
        .context("page screenshot failed")
}
