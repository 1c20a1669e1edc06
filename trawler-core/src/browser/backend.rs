use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};

/// Launch/close seam the pool is generic over. The production backend
/// drives Chromium; tests substitute a stub.
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    async fn launch(&self) -> BrowserResult<Self::Handle>;

    /// Closes a browser the pool has finished with. Must not fail; closing
    /// problems are logged by the implementation.
    async fn close(&self, handle: Self::Handle);
}

/// A launched Chromium instance plus the task draining its CDP event stream.
#[derive(Debug)]
pub struct ChromiumHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl ChromiumHandle {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }
}

#[derive(Debug, Clone)]
pub struct ChromiumBackend {
    config: ChromiumSection,
}

impl ChromiumBackend {
    pub fn new(config: ChromiumSection) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChromiumSection {
        &self.config
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: self.config.window_width,
            height: self.config.window_height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: self.config.window_width >= self.config.window_height,
            has_touch: false,
        });
        if !self.config.executable_path.is_empty() {
            builder = builder.chrome_executable(&self.config.executable_path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!("--user-agent={}", self.config.user_agent),
            format!(
                "--window-size={},{}",
                self.config.window_width, self.config.window_height
            ),
            "--no-first-run".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-features=AutomationControlled".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    type Handle = ChromiumHandle;

    async fn launch(&self) -> BrowserResult<ChromiumHandle> {
        let chromium_config = self.build_chromium_config()?;
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(ChromiumHandle {
            browser,
            handler_task,
        })
    }

    async fn close(&self, mut handle: ChromiumHandle) {
        if let Err(err) = handle.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        handle.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> ChromiumSection {
        ChromiumSection {
            executable_path: "/usr/bin/chromium".to_string(),
            headless: true,
            sandbox: false,
            window_width: 1366,
            window_height: 768,
            user_agent: "Mozilla/5.0 test".to_string(),
            extra_args: vec!["--lang=en-US".to_string()],
        }
    }

    #[test]
    fn launch_config_builds_with_viewport_and_args() {
        let backend = ChromiumBackend::new(section());
        let config = backend.build_chromium_config();
        assert!(config.is_ok());
    }
}
