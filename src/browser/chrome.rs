use crate::error::{Result, StudioError};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::GetVersionParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::page::Page;
use chromiumoxide_fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

/// Viewport dimensions requested at page creation.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Connection mode for the Chromium instance behind the studio.
pub enum ConnectionMode {
    /// Launch a Chrome process owned by this server.
    Launch {
        chrome_path: Option<String>,
        cdp_port: u16,
        no_sandbox: bool,
        headless: bool,
    },
    /// Attach to an already-running Chrome on a debug port.
    DebugPort(u16),
}

/// Owns the browser connection and hands out page handles.
///
/// One driver per process; pages created here are registered with the
/// `PageRegistry` and outlive individual HTTP requests.
pub struct ChromeDriver {
    browser: Browser,
    temp_dir: Option<PathBuf>,
}

impl ChromeDriver {
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Launch {
                chrome_path,
                cdp_port,
                no_sandbox,
                headless,
            } => {
                // Unique profile directory so parallel instances never share state.
                let unique_id = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                let temp_dir = std::env::temp_dir().join(format!("chromacast-{}", unique_id));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    StudioError::LaunchFailed(format!("Failed to create profile directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };

                config = config.user_data_dir(&temp_dir);
                config = config.arg(format!("--remote-debugging-port={}", cdp_port));

                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }

                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                } else {
                    match Self::ensure_chrome_installed().await {
                        Ok(path) => {
                            config = config.chrome_executable(path);
                        }
                        Err(e) => {
                            log::warn!("Chrome auto-download failed ({}), trying system Chrome", e);
                        }
                    }
                }

                let built = config.build().map_err(StudioError::LaunchFailed)?;
                let (browser, mut handler) = Browser::launch(built).await.map_err(|e| {
                    StudioError::LaunchFailed(format!(
                        "{}. Install Chrome or pass --chrome-path; on Linux sandbox issues try --no-sandbox",
                        e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Drive the CDP connection.
                    }
                });

                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    StudioError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                         Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Drive the CDP connection.
                    }
                });

                (browser, None)
            }
        };

        Ok(Self { browser, temp_dir })
    }

    /// CDP websocket endpoint of the underlying browser.
    pub fn ws_endpoint(&self) -> String {
        self.browser.websocket_address().to_string()
    }

    /// Create a fresh page, optionally sized to the requested viewport.
    pub async fn create_page(&self, viewport: Option<Viewport>) -> Result<Page> {
        let page = tokio::time::timeout(
            Duration::from_secs(30),
            self.browser.new_page("about:blank"),
        )
        .await
        .map_err(|_| StudioError::Other("Timed out creating page".to_string()))?
        .map_err(|e| StudioError::Other(format!("Failed to create page: {}", e)))?;

        if let Some(vp) = viewport {
            let params: SetDeviceMetricsOverrideParams = serde_json::from_value(json!({
                "width": vp.width,
                "height": vp.height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            }))?;
            page.execute(params).await?;
        }

        Ok(page)
    }

    /// Check whether the browser connection is still healthy by running a
    /// `Browser.getVersion` round trip over the CDP socket. A dead or hung
    /// connection fails the probe within two seconds.
    pub async fn is_alive(&self) -> bool {
        let probe = self.browser.execute(GetVersionParams::default());
        matches!(
            tokio::time::timeout(Duration::from_secs(2), probe).await,
            Ok(Ok(_))
        )
    }

    /// Close the browser connection and clean up the profile directory.
    pub async fn close(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| StudioError::Other(e.to_string()))?;
        Ok(())
    }

    /// Locate a usable Chrome binary, fetching one on first use.
    ///
    /// The resolved executable path is recorded in a small state file inside
    /// the cache, so later runs reuse it with a single stat instead of
    /// probing platform-specific directory layouts. A recorded path that no
    /// longer exists (a wiped or partial download) triggers a fresh fetch
    /// and overwrites the record.
    async fn ensure_chrome_installed() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| StudioError::Other("no cache directory on this system".to_string()))?
            .join("chromacast")
            .join("browser");
        tokio::fs::create_dir_all(&cache_dir).await?;

        let record = cache_dir.join("chrome-path");
        if let Ok(recorded) = tokio::fs::read_to_string(&record).await {
            let executable = PathBuf::from(recorded.trim());
            if executable.is_file() {
                return Ok(executable);
            }
            log::warn!(
                "recorded browser at {} is gone, fetching again",
                executable.display()
            );
        }

        log::info!("no cached browser, fetching Chrome for Testing into {}", cache_dir.display());
        let fetcher = BrowserFetcher::new(
            BrowserFetcherOptions::builder()
                .with_path(&cache_dir)
                .build()
                .map_err(|e| StudioError::Other(format!("fetcher options invalid: {}", e)))?,
        );
        let info = fetcher
            .fetch()
            .await
            .map_err(|e| StudioError::Other(format!("browser fetch failed: {}", e)))?;

        tokio::fs::write(&record, info.executable_path.to_string_lossy().as_bytes()).await?;
        Ok(info.executable_path)
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        // Launched instances own their profile directory; attached ones
        // have nothing to clean up.
        if let Some(profile) = self.temp_dir.take() {
            let _ = std::fs::remove_dir_all(profile);
        }
    }
}
