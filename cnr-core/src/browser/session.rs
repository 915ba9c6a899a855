use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, LookupConfig, SelectorSection, TimeoutsSection};

use super::error::{BrowserError, BrowserResult};

/// Task-level operations the lookup engine drives against the portal.
/// One implementation wraps a live Chromium tab; tests substitute mocks.
#[async_trait]
pub trait PortalSession: Send + Sync {
    async fn current_url(&self) -> BrowserResult<String>;
    /// Navigates to `target` unless the session is already on its host.
    /// Returns whether a navigation actually happened.
    async fn navigate_if_needed(&self, target: &str) -> BrowserResult<bool>;
    async fn refresh(&self) -> BrowserResult<()>;
    /// Waits for the CAPTCHA element to render and returns its pixels as PNG.
    async fn capture_captcha_image(&self) -> BrowserResult<Vec<u8>>;
    /// Clears and fills the case-number and CAPTCHA fields, then submits.
    async fn submit_attempt(&self, case_number: &str, captcha_text: &str) -> BrowserResult<()>;
    /// Polls the validation indicator until it appears. `true` means the
    /// portal accepted the CAPTCHA (the indicator stayed hidden).
    async fn await_validation_outcome(&self, wait: Duration) -> BrowserResult<bool>;
    async fn page_html(&self) -> BrowserResult<String>;
    /// Reads `<td>` rows out of the table matching `selector` through the
    /// live page, for content that only exists after in-page script ran.
    async fn extract_table_rows(&self, selector: &str) -> BrowserResult<Vec<Vec<String>>>;
    /// Closes the lookup tab and leaves the session on another usable tab.
    async fn close_lookup_tab(&self) -> BrowserResult<()>;
}

/// Hands out the shared browser session and replaces it when it dies.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self) -> BrowserResult<Arc<dyn PortalSession>>;
    async fn restart(&self) -> BrowserResult<Arc<dyn PortalSession>>;
}

pub struct ChromiumSession {
    browser: AsyncMutex<Browser>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    page: AsyncMutex<Page>,
    selectors: SelectorSection,
    timeouts: TimeoutsSection,
}

impl ChromiumSession {
    async fn launch(config: &LookupConfig) -> BrowserResult<Self> {
        let chromium_config = build_chromium_config(&config.chromium, &config.timeouts)?;
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Init(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        let session = Self {
            browser: AsyncMutex::new(browser),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            page: AsyncMutex::new(page),
            selectors: config.selectors.clone(),
            timeouts: config.timeouts.clone(),
        };
        session.goto(&config.search_url()).await?;
        info!(url = %config.search_url(), "chromium session ready");
        Ok(session)
    }

    pub async fn is_alive(&self) -> bool {
        self.current_url().await.is_ok()
    }

    pub async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        drop(browser);
        let handle = self.handler_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
    }

    async fn goto(&self, url: &str) -> BrowserResult<()> {
        let page = self.page.lock().await;
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn wait_for_element(&self, selector: &str) -> BrowserResult<Element> {
        let deadline = Instant::now() + Duration::from_secs(self.timeouts.element_wait_seconds);
        loop {
            {
                let page = self.page.lock().await;
                if let Ok(element) = page.find_element(selector).await {
                    return Ok(element);
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(selector.to_string()));
            }
            sleep(Duration::from_millis(self.timeouts.poll_interval_ms)).await;
        }
    }

    /// Evaluates `script` on the current page under the script timeout.
    async fn evaluate_value<T: serde::de::DeserializeOwned>(
        &self,
        script: &str,
    ) -> BrowserResult<T> {
        let page = self.page.lock().await;
        let evaluation =
            tokio::time::timeout(Duration::from_secs(self.timeouts.script_seconds), async {
                page.evaluate(script).await
            })
            .await
            .map_err(|_| BrowserError::Timeout("script evaluation".into()))??;
        evaluation
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("failed to decode script result: {err}")))
    }

    async fn clear_and_type(&self, selector: &str, text: &str) -> BrowserResult<()> {
        let element = self.wait_for_element(selector).await?;
        let clear_script = format!(
            "document.querySelector({}).value = ''",
            serde_json::to_string(selector).unwrap_or_default()
        );
        let _: Option<serde_json::Value> = self.evaluate_value(&clear_script).await?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }
}

#[async_trait]
impl PortalSession for ChromiumSession {
    async fn current_url(&self) -> BrowserResult<String> {
        let page = self.page.lock().await;
        Ok(page.url().await?.unwrap_or_default())
    }

    async fn navigate_if_needed(&self, target: &str) -> BrowserResult<bool> {
        let current = self.current_url().await?;
        let on_target = match url::Url::parse(target)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
        {
            Some(host) => current.contains(&host),
            None => current.starts_with(target),
        };
        if on_target {
            return Ok(false);
        }
        self.goto(target).await?;
        Ok(true)
    }

    async fn refresh(&self) -> BrowserResult<()> {
        let page = self.page.lock().await;
        page.reload().await?;
        Ok(())
    }

    async fn capture_captcha_image(&self) -> BrowserResult<Vec<u8>> {
        let element = self.wait_for_element(&self.selectors.captcha_image).await?;
        let bytes = element.screenshot(CaptureScreenshotFormat::Png).await?;
        Ok(bytes)
    }

    async fn submit_attempt(&self, case_number: &str, captcha_text: &str) -> BrowserResult<()> {
        self.clear_and_type(&self.selectors.case_number_input, case_number)
            .await?;
        self.clear_and_type(&self.selectors.captcha_input, captcha_text)
            .await?;
        let button = self.wait_for_element(&self.selectors.search_button).await?;
        button.click().await?;
        Ok(())
    }

    async fn await_validation_outcome(&self, wait: Duration) -> BrowserResult<bool> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? (el.getAttribute('style') || '') : null; }})()",
            serde_json::to_string(&self.selectors.validation_indicator).unwrap_or_default()
        );
        let deadline = Instant::now() + wait;
        loop {
            let style: Option<String> = self.evaluate_value(&script).await?;
            if let Some(style) = style {
                return Ok(style.contains("display: none"));
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ValidationTimeout);
            }
            sleep(Duration::from_millis(self.timeouts.poll_interval_ms)).await;
        }
    }

    async fn page_html(&self) -> BrowserResult<String> {
        let page = self.page.lock().await;
        Ok(page.content().await?)
    }

    async fn extract_table_rows(&self, selector: &str) -> BrowserResult<Vec<Vec<String>>> {
        let script = format!(
            r#"(() => {{
    const table = document.querySelector({selector});
    if (!table) return [];
    const rows = [];
    table.querySelectorAll('tr').forEach(tr => {{
        const cells = [];
        tr.querySelectorAll('td').forEach(td => {{
            cells.push((td.innerText || td.textContent || '').trim());
        }});
        rows.push(cells);
    }});
    return rows;
}})()"#,
            selector = serde_json::to_string(selector).unwrap_or_default()
        );
        self.evaluate_value(&script).await
    }

    async fn close_lookup_tab(&self) -> BrowserResult<()> {
        let mut page = self.page.lock().await;
        let closing = page.clone();
        closing.close().await?;

        let browser = self.browser.lock().await;
        let remaining = browser.pages().await?;
        match remaining.into_iter().last() {
            Some(next) => {
                next.bring_to_front().await?;
                *page = next;
            }
            None => {
                *page = browser.new_page("about:blank").await?;
            }
        }
        Ok(())
    }
}

/// Owns the process-wide Chromium session. The slot lock serializes probe,
/// creation, and teardown; lookups themselves are serialized by the engine.
pub struct SessionManager {
    config: Arc<LookupConfig>,
    slot: AsyncMutex<Option<Arc<ChromiumSession>>>,
}

impl SessionManager {
    pub fn new(config: Arc<LookupConfig>) -> Self {
        Self {
            config,
            slot: AsyncMutex::new(None),
        }
    }

    async fn create_session(&self) -> BrowserResult<Arc<ChromiumSession>> {
        match ChromiumSession::launch(&self.config).await {
            Ok(session) => Ok(Arc::new(session)),
            Err(first) => {
                warn!(error = %first, "chromium launch failed, retrying once");
                ChromiumSession::launch(&self.config)
                    .await
                    .map(Arc::new)
                    .map_err(|err| {
                        BrowserError::Init(format!("browser launch failed twice: {err}"))
                    })
            }
        }
    }

    /// Current URL of the live session, or `None` when no healthy session
    /// exists. Never creates a session.
    pub async fn probe(&self) -> Option<String> {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(session) => session.current_url().await.ok(),
            None => None,
        }
    }

    pub async fn quit(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.take() {
            session.shutdown().await;
        }
    }
}

#[async_trait]
impl SessionProvider for SessionManager {
    async fn acquire(&self) -> BrowserResult<Arc<dyn PortalSession>> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.is_alive().await {
                return Ok(Arc::clone(session) as Arc<dyn PortalSession>);
            }
            warn!("browser session unresponsive, recreating");
            session.shutdown().await;
            *slot = None;
        }
        let session = self.create_session().await?;
        *slot = Some(Arc::clone(&session));
        Ok(session as Arc<dyn PortalSession>)
    }

    async fn restart(&self) -> BrowserResult<Arc<dyn PortalSession>> {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.take() {
            old.shutdown().await;
        }
        let session = self.create_session().await?;
        *slot = Some(Arc::clone(&session));
        Ok(session as Arc<dyn PortalSession>)
    }
}

fn build_chromium_config(
    chromium: &ChromiumSection,
    timeouts: &TimeoutsSection,
) -> BrowserResult<ChromiumConfig> {
    let mut builder = ChromiumConfig::builder()
        .request_timeout(Duration::from_secs(timeouts.page_load_seconds));

    if let Some(path) = &chromium.executable_path {
        builder = builder.chrome_executable(path);
    }
    if !chromium.headless {
        builder = builder.with_head();
    }
    if !chromium.sandbox {
        builder = builder.no_sandbox();
    }

    let [width, height] = chromium.window_size;
    let mut args = vec![
        format!("--window-size={width},{height}"),
        "--disable-notifications".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-translate".to_string(),
        "--no-first-run".to_string(),
    ];
    if chromium.disable_gpu {
        args.push("--disable-gpu".to_string());
    }
    args.extend(chromium.extra_args.iter().cloned());
    builder = builder.args(args);

    builder.build().map_err(BrowserError::Configuration)
}
