//! Chrome engine over the DevTools protocol.
//!
//! Element references are CSS selectors (plus an optional text filter) and a
//! match index. Every operation is a single script evaluated in the page that
//! finds the element again, instead of holding remote node ids that go stale
//! when the app re-renders.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::BringToFrontParams;
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, TargetId};
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::browser_script;
use crate::config::LaunchOptions;
use crate::engine::{
    BrowserEngine, BrowserPage, BrowserSession, ElementRef, NewPageSubscription, PageHandle,
    TextMatch, SELECTOR_POLL_INTERVAL,
};
use crate::errors::ReplayError;
use crate::selector::Selector;

/// Attempts made to find the page object of a freshly created target.
const NEW_PAGE_LOOKUPS: u32 = 50;

/// Transport failures mean the browser is gone; everything else is scoped to
/// the element or script that caused it.
fn cdp_error(err: CdpError) -> ReplayError {
    match err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            ReplayError::SessionFault(err.to_string())
        }
        other => ReplayError::ElementAction(other.to_string()),
    }
}

fn session_closed() -> ReplayError {
    ReplayError::SessionFault("browser session already closed".to_string())
}

/// Launches a local Chrome/Chromium per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeEngine;

impl ChromeEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    #[instrument(skip_all, fields(headless = options.headless))]
    async fn launch_session(
        &self,
        options: &LaunchOptions,
    ) -> Result<Box<dyn BrowserSession>, ReplayError> {
        let mut builder = BrowserConfig::builder()
            .viewport(None)
            .request_timeout(options.navigation_timeout);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &options.args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| ReplayError::SessionFault(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ReplayError::SessionFault(format!("failed to launch Chrome: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler error");
                }
            }
            debug!("CDP handler finished");
        });
        info!("Chrome session started");

        Ok(Box::new(ChromeSession {
            browser: Arc::new(Mutex::new(Some(browser))),
            handler: Mutex::new(Some(handler_task)),
            options: options.clone(),
        }))
    }
}

struct ChromeSession {
    browser: Arc<Mutex<Option<Browser>>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    options: LaunchOptions,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LoadState {
    ready: bool,
    resources: Option<u64>,
}

async fn load_state(page: &Page) -> Result<LoadState, ReplayError> {
    let value = evaluate_value(page, browser_script::LOAD_STATE_EXPR).await?;
    serde_json::from_value(value)
        .map_err(|e| ReplayError::ElementAction(format!("unexpected load state: {e}")))
}

/// Poll `check` until the document is complete and its resource count has
/// held still for `quiet`.
///
/// A failed check that is not fatal means the document was replaced while
/// being inspected (client-side redirects do this), so the quiet period
/// starts over. Only running out of `timeout` fails the navigation.
async fn wait_until_quiet<F, Fut>(
    url: &str,
    timeout: Duration,
    quiet: Duration,
    mut check: F,
) -> Result<(), ReplayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LoadState, ReplayError>>,
{
    let deadline = Instant::now() + timeout;
    let mut last_count = None;
    let mut quiet_since = Instant::now();
    let mut last_error = None;

    loop {
        match check().await {
            Ok(state) => {
                last_error = None;
                if state.ready && state.resources.is_some() && state.resources == last_count {
                    if quiet_since.elapsed() >= quiet {
                        return Ok(());
                    }
                } else {
                    last_count = state.resources;
                    quiet_since = Instant::now();
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(%url, error = %e, "load check failed, document still changing");
                last_count = None;
                quiet_since = Instant::now();
                last_error = Some(e);
            }
        }

        if Instant::now() >= deadline {
            let reason = match last_error {
                Some(e) => format!("page did not settle within {timeout:?}: {e}"),
                None => format!("network did not settle within {timeout:?}"),
            };
            return Err(ReplayError::NavigationFailure {
                url: url.to_string(),
                reason,
            });
        }
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    #[instrument(skip(self))]
    async fn open_page(&self, url: &str) -> Result<PageHandle, ReplayError> {
        let page = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().ok_or_else(session_closed)?;
            browser.new_page("about:blank").await.map_err(cdp_error)?
        };

        let navigation = tokio::time::timeout(self.options.navigation_timeout, page.goto(url)).await;
        match navigation {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(ReplayError::NavigationFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ReplayError::NavigationFailure {
                    url: url.to_string(),
                    reason: format!("timed out after {:?}", self.options.navigation_timeout),
                })
            }
        }
        wait_until_quiet(
            url,
            self.options.navigation_timeout,
            self.options.network_quiet,
            || load_state(&page),
        )
        .await?;

        Ok(Arc::new(ChromePage::new(page, self.options.slow_mo)))
    }

    async fn subscribe_new_pages(&self) -> Result<NewPageSubscription, ReplayError> {
        let mut events = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().ok_or_else(session_closed)?;
            browser
                .event_listener::<EventTargetCreated>()
                .await
                .map_err(cdp_error)?
        };

        let (tx, rx) = mpsc::unbounded_channel::<PageHandle>();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let browser = self.browser.clone();
        let slow_mo = self.options.slow_mo;

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = stop.cancelled() => break,
                    event = events.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if event.target_info.r#type != "page" {
                    continue;
                }
                let target_id = event.target_info.target_id.clone();
                match find_page(&browser, &target_id, &stop).await {
                    Some(page) => {
                        debug!(target = ?target_id, "new page attached");
                        if tx.send(Arc::new(ChromePage::new(page, slow_mo))).is_err() {
                            break;
                        }
                    }
                    None => warn!(target = ?target_id, "new target never became an attached page"),
                }
            }
        });

        Ok(NewPageSubscription::new(rx, cancel))
    }

    async fn close(&self) -> Result<(), ReplayError> {
        let browser = self.browser.lock().await.take();
        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map_err(cdp_error);
                if let Err(e) = browser.wait().await {
                    debug!(error = %e, "waiting for the browser process failed");
                }
                closed.map(|_| ())
            }
            None => Ok(()),
        };
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        info!("Chrome session closed");
        result
    }
}

async fn find_page(
    browser: &Mutex<Option<Browser>>,
    target_id: &TargetId,
    stop: &CancellationToken,
) -> Option<Page> {
    for _ in 0..NEW_PAGE_LOOKUPS {
        if stop.is_cancelled() {
            return None;
        }
        {
            let guard = browser.lock().await;
            let pages = guard.as_ref()?.pages().await.ok()?;
            if let Some(page) = pages.into_iter().find(|p| p.target_id() == target_id) {
                return Some(page);
            }
        }
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
    None
}

async fn evaluate_value(page: &Page, script: &str) -> Result<Value, ReplayError> {
    let result = page.evaluate(script.to_string()).await.map_err(cdp_error)?;
    Ok(result.value().cloned().unwrap_or(Value::Null))
}

pub struct ChromePage {
    page: Page,
    slow_mo: Duration,
}

impl ChromePage {
    pub fn new(page: Page, slow_mo: Duration) -> Self {
        Self { page, slow_mo }
    }

    async fn count(&self, selector: &Selector, text: Option<&TextMatch>) -> Result<usize, ReplayError> {
        let css = selector.to_css()?;
        let count = evaluate_value(&self.page, &browser_script::count_expr(&css, text))
            .await?
            .as_u64()
            .unwrap_or(0);
        Ok(count as usize)
    }

    /// Run `function` with `this` bound to the element and return its result.
    async fn on_element(&self, element: &ElementRef, function: &str) -> Result<Value, ReplayError> {
        let css = element.selector().to_css()?;
        let script =
            browser_script::on_element_expr(&css, element.text(), element.index(), function);
        let mut result = evaluate_value(&self.page, &script).await?;
        if result.get("attached").and_then(Value::as_bool) != Some(true) {
            return Err(ReplayError::ElementAction(format!(
                "{element} is no longer attached"
            )));
        }
        Ok(result
            .get_mut("value")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn slow_down(&self) {
        if !self.slow_mo.is_zero() {
            tokio::time::sleep(self.slow_mo).await;
        }
    }
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn url(&self) -> Result<String, ReplayError> {
        Ok(self.page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn query_all(&self, selector: &Selector) -> Result<Vec<ElementRef>, ReplayError> {
        let count = self.count(selector, None).await?;
        Ok((0..count)
            .map(|i| ElementRef::new(selector.clone(), i))
            .collect())
    }

    async fn text_content(&self, element: &ElementRef) -> Result<String, ReplayError> {
        let text = self.on_element(element, browser_script::TEXT_FN).await?;
        Ok(text.as_str().unwrap_or_default().to_string())
    }

    async fn find_by_text(
        &self,
        selector: &Selector,
        text: TextMatch,
    ) -> Result<Option<ElementRef>, ReplayError> {
        if self.count(selector, Some(&text)).await? == 0 {
            return Ok(None);
        }
        Ok(Some(ElementRef::with_text(selector.clone(), text, 0)))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ReplayError> {
        evaluate_value(&self.page, script).await
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), ReplayError> {
        self.on_element(element, browser_script::SCROLL_INTO_CENTER_FN)
            .await
            .map(|_| ())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), ReplayError> {
        self.slow_down().await;
        let target = self.on_element(element, browser_script::CLICK_POINT_FN).await?;
        if target.get("covered").and_then(Value::as_bool).unwrap_or(true) {
            return Err(ReplayError::ElementAction(format!(
                "{element} is covered by another element"
            )));
        }
        let (Some(x), Some(y)) = (
            target.get("x").and_then(Value::as_f64),
            target.get("y").and_then(Value::as_f64),
        ) else {
            return Err(ReplayError::ElementAction(format!(
                "{element} has no clickable point"
            )));
        };
        self.page
            .click(Point::new(x, y))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn programmatic_click(&self, element: &ElementRef) -> Result<(), ReplayError> {
        self.slow_down().await;
        self.on_element(element, browser_script::PROGRAMMATIC_CLICK_FN)
            .await
            .map(|_| ())
    }

    async fn set_controlled_value(
        &self,
        element: &ElementRef,
        text: &str,
    ) -> Result<(), ReplayError> {
        self.slow_down().await;
        self.on_element(element, &browser_script::controlled_value_fn(text))
            .await
            .map(|_| ())
    }

    async fn set_focused_value(&self, text: &str) -> Result<bool, ReplayError> {
        self.slow_down().await;
        let value = self
            .evaluate(&browser_script::focused_value_expr(text))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn bring_to_front(&self) -> Result<(), ReplayError> {
        self.page
            .execute(BringToFrontParams::default())
            .await
            .map_err(cdp_error)?;
        Ok(())
    }
}
