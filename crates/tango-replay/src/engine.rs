//! Browser-automation collaborator contract.
//!
//! The replay core only talks to these traits. [`crate::chrome`] drives a real
//! Chrome over the DevTools protocol and [`crate::mock`] is an in-memory page
//! model for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::browser_script;
use crate::config::LaunchOptions;
use crate::errors::ReplayError;
use crate::selector::Selector;

/// Interval between polls while waiting for a selector.
pub const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type PageHandle = Arc<dyn BrowserPage>;

/// Filter on an element's rendered text. Needles are stored lowercased and
/// compared against the lowercased text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "needle", rename_all = "snake_case")]
pub enum TextMatch {
    Contains(String),
    /// Whole text, ignoring surrounding whitespace.
    Equals(String),
}

impl TextMatch {
    pub fn contains(needle: &str) -> Self {
        TextMatch::Contains(needle.to_lowercase())
    }

    pub fn equals(needle: &str) -> Self {
        TextMatch::Equals(needle.trim().to_lowercase())
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            TextMatch::Contains(needle) => text.to_lowercase().contains(needle.as_str()),
            TextMatch::Equals(needle) => text.trim().to_lowercase() == *needle,
        }
    }
}

impl std::fmt::Display for TextMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextMatch::Contains(needle) => write!(f, "text~={needle:?}"),
            TextMatch::Equals(needle) => write!(f, "text={needle:?}"),
        }
    }
}

/// The `index`-th DOM match of `selector` (counting only elements whose text
/// passes `text`, when set), resolved again on every use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ElementRef {
    selector: Selector,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextMatch>,
    index: usize,
}

impl ElementRef {
    pub fn new(selector: Selector, index: usize) -> Self {
        Self {
            selector,
            text: None,
            index,
        }
    }

    /// Reference that keeps pointing at the same element when siblings with
    /// other text are added or removed.
    pub fn with_text(selector: Selector, text: TextMatch, index: usize) -> Self {
        Self {
            selector,
            text: Some(text),
            index,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn text(&self) -> Option<&TextMatch> {
        self.text.as_ref()
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} {} [{}]", self.selector, text, self.index),
            None => write!(f, "{} [{}]", self.selector, self.index),
        }
    }
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch_session(
        &self,
        options: &LaunchOptions,
    ) -> Result<Box<dyn BrowserSession>, ReplayError>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a new page, navigate to `url` and wait for the network to settle.
    async fn open_page(&self, url: &str) -> Result<PageHandle, ReplayError>;

    /// Start receiving pages created after this call.
    async fn subscribe_new_pages(&self) -> Result<NewPageSubscription, ReplayError>;

    /// Release the browser. Called exactly once per session.
    async fn close(&self) -> Result<(), ReplayError>;
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn url(&self) -> Result<String, ReplayError>;

    /// All current matches of `selector`, in document order.
    async fn query_all(&self, selector: &Selector) -> Result<Vec<ElementRef>, ReplayError>;

    async fn text_content(&self, element: &ElementRef) -> Result<String, ReplayError>;

    /// First match of `selector` in document order whose text passes `text`.
    ///
    /// Engines that can filter inside the page should override this; the
    /// default reads every candidate's text in turn.
    async fn find_by_text(
        &self,
        selector: &Selector,
        text: TextMatch,
    ) -> Result<Option<ElementRef>, ReplayError> {
        for candidate in self.query_all(selector).await? {
            match self.text_content(&candidate).await {
                Ok(content) if text.is_match(&content) => {
                    return Ok(Some(ElementRef::with_text(selector.clone(), text, 0)));
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::debug!(%candidate, error = %e, "skipping unreadable element"),
            }
        }
        Ok(None)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ReplayError>;

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), ReplayError>;

    /// Trusted pointer click at the element's position.
    async fn click(&self, element: &ElementRef) -> Result<(), ReplayError>;

    /// `element.click()` invoked from script; works on covered elements.
    async fn programmatic_click(&self, element: &ElementRef) -> Result<(), ReplayError>;

    /// Write `text` through the native value setter and dispatch a bubbling
    /// `input` event.
    async fn set_controlled_value(&self, element: &ElementRef, text: &str)
        -> Result<(), ReplayError>;

    async fn bring_to_front(&self) -> Result<(), ReplayError>;

    /// Same as [`BrowserPage::set_controlled_value`] on whatever holds keyboard
    /// focus. Returns `false` when nothing does.
    async fn set_focused_value(&self, text: &str) -> Result<bool, ReplayError> {
        let value = self
            .evaluate(&browser_script::focused_value_expr(text))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn wait_for_selector(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<ElementRef, ReplayError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.query_all(selector).await {
                Ok(found) => {
                    if let Some(first) = found.into_iter().next() {
                        return Ok(first);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::debug!(%selector, error = %e, "selector poll failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ReplayError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }
}

/// Pages created in a session after subscribing. Dropping the subscription
/// (or calling [`NewPageSubscription::unsubscribe`]) stops delivery.
pub struct NewPageSubscription {
    pages: mpsc::UnboundedReceiver<PageHandle>,
    _guard: DropGuard,
}

impl NewPageSubscription {
    /// `cancel` is triggered when the subscription goes away, so producers
    /// can stop forwarding.
    pub fn new(pages: mpsc::UnboundedReceiver<PageHandle>, cancel: CancellationToken) -> Self {
        Self {
            pages,
            _guard: cancel.drop_guard(),
        }
    }

    /// Wait for the next new page. `None` once the session stops delivering.
    pub async fn next_page(&mut self) -> Option<PageHandle> {
        self.pages.recv().await
    }

    /// Wait at most `timeout` for the next new page.
    pub async fn next_page_within(&mut self, timeout: Duration) -> Option<PageHandle> {
        tokio::time::timeout(timeout, self.pages.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for NewPageSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewPageSubscription").finish_non_exhaustive()
    }
}
