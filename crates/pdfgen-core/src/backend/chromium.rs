//! Headless Chromium backend
//!
//! Every render launches its own browser with a throw-away profile, prints
//! the page and closes the browser again. If the render future is dropped
//! mid-way, dropping the [`BrowserSession`] kills the child process and stops
//! its event handler, so a cancelled render never leaves Chromium running.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::{PrintOptions, RenderBackend};
use crate::errors::BackendError;
use crate::layout::LayoutSpec;

/// Launch settings for [`ChromiumBackend`]
#[derive(Debug, Clone, Default)]
pub struct ChromiumOptions {
    /// Pass `--no-sandbox` (needed when running as root in containers)
    pub no_sandbox: bool,
    /// Explicit browser binary; auto-detected when unset
    pub executable: Option<PathBuf>,
    /// Surface browser protocol errors at warn level
    pub debug: bool,
}

/// Renders pages to PDF with a fresh headless Chromium per job
#[derive(Debug, Clone, Default)]
pub struct ChromiumBackend {
    options: ChromiumOptions,
}

impl ChromiumBackend {
    pub fn new(options: ChromiumOptions) -> Self {
        Self { options }
    }

    fn browser_config(&self, profile: &Path) -> Result<BrowserConfig, BackendError> {
        let mut builder = BrowserConfig::builder().user_data_dir(profile);

        if self.options.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &self.options.executable {
            builder = builder.chrome_executable(executable);
        }

        builder.build().map_err(BackendError::Launch)
    }
}

#[async_trait]
impl RenderBackend for ChromiumBackend {
    async fn render(&self, url: &Url, layout: &LayoutSpec) -> Result<Vec<u8>, BackendError> {
        let profile = tempfile::Builder::new()
            .prefix("pdfgen-chrome")
            .tempdir()
            .map_err(|e| BackendError::Launch(format!("failed to create profile dir: {}", e)))?;
        let config = self.browser_config(profile.path())?;

        let mut session = BrowserSession::launch(config, profile, self.options.debug).await?;
        let result = session.print(url, layout).await;
        session.close().await;

        result
    }
}

/// A running browser plus the task pumping its protocol events
struct BrowserSession {
    // Dropped first: kills the child before the profile directory goes away
    browser: Browser,
    handler: JoinHandle<()>,
    _profile: TempDir,
}

impl BrowserSession {
    async fn launch(
        config: BrowserConfig,
        profile: TempDir,
        debug_mode: bool,
    ) -> Result<Self, BackendError> {
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BackendError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    if debug_mode {
                        warn!(section = "chromium", error = %e, "browser handler error");
                    } else {
                        debug!(section = "chromium", error = %e, "browser handler error");
                    }
                }
            }
        });

        debug!(section = "chromium", "browser launched");
        Ok(Self {
            browser,
            handler,
            _profile: profile,
        })
    }

    async fn print(&self, url: &Url, layout: &LayoutSpec) -> Result<Vec<u8>, BackendError> {
        let navigation_error = |e: chromiumoxide::error::CdpError| BackendError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        };

        let page = self
            .browser
            .new_page(url.as_str())
            .await
            .map_err(navigation_error)?;
        page.wait_for_navigation().await.map_err(navigation_error)?;

        let opts = PrintOptions::from_layout(layout);
        let params = PrintToPdfParams {
            landscape: Some(opts.landscape),
            display_header_footer: Some(opts.display_header_footer),
            print_background: Some(opts.print_background),
            prefer_css_page_size: Some(opts.prefer_css_page_size),
            paper_width: Some(opts.paper_width),
            paper_height: Some(opts.paper_height),
            margin_left: Some(opts.margin_left),
            margin_top: Some(opts.margin_top),
            margin_right: Some(opts.margin_right),
            margin_bottom: Some(opts.margin_bottom),
            ..Default::default()
        };

        page.pdf(params)
            .await
            .map_err(|e| BackendError::Print(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(section = "chromium", error = %e, "browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            debug!(section = "chromium", error = %e, "browser wait failed");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
