//! In-memory browser engine.
//!
//! Pages are flat lists of [`MockElement`]s matched directly against
//! [`Selector`]s. Every interaction is recorded as a [`PageEvent`] so tests can
//! assert on what the replay actually did. Elements can be made to appear
//! late, to reject pointer clicks, or to open another page when clicked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::LaunchOptions;
use crate::engine::{
    BrowserEngine, BrowserPage, BrowserSession, ElementRef, NewPageSubscription, PageHandle,
};

use crate::errors::ReplayError;
use crate::selector::Selector;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
pub struct MockElement {
    tag: String,
    test_id: Option<String>,
    placeholder: Option<String>,
    text: String,
    value: String,
    covered: bool,
    appears_after: u32,
    focused: bool,
    crashes: bool,
    opens: Option<Arc<MockPage>>,
}

impl MockElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_lowercase(),
            ..Default::default()
        }
    }

    pub fn input(placeholder: impl Into<String>) -> Self {
        Self::new("input").with_placeholder(placeholder)
    }

    pub fn textarea(placeholder: impl Into<String>) -> Self {
        Self::new("textarea").with_placeholder(placeholder)
    }

    pub fn button(text: impl Into<String>) -> Self {
        Self::new("button").with_text(text)
    }

    pub fn link(text: impl Into<String>) -> Self {
        Self::new("a").with_text(text)
    }

    /// A step title as rendered by the workflow editor.
    pub fn step_title(text: impl Into<String>) -> Self {
        Self::new("div")
            .with_test_id(crate::config::DEFAULT_STEP_SELECTOR.trim_start_matches("testid:"))
            .with_text(text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_test_id(mut self, id: impl Into<String>) -> Self {
        self.test_id = Some(id.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Pointer clicks fail as if another element overlapped this one.
    pub fn covered(mut self) -> Self {
        self.covered = true;
        self
    }

    /// Only matched once the page has been queried `polls` times.
    pub fn appears_after(mut self, polls: u32) -> Self {
        self.appears_after = polls;
        self
    }

    /// Holds keyboard focus when the page loads.
    pub fn focused(mut self) -> Self {
        self.focused = true;
        self
    }

    /// Clicking this element takes the whole page down.
    pub fn crashes(mut self) -> Self {
        self.crashes = true;
        self
    }

    /// Clicking this element opens `page` in a new tab.
    pub fn opens(mut self, page: Arc<MockPage>) -> Self {
        self.opens = Some(page);
        self
    }

    fn label(&self) -> String {
        self.placeholder.clone().unwrap_or_else(|| self.text.clone())
    }

    fn is_text_control(&self) -> bool {
        self.tag == "input" || self.tag == "textarea"
    }

    fn matches(&self, selector: &Selector) -> Result<bool, ReplayError> {
        Ok(match selector {
            Selector::TestId(id) => self.test_id.as_deref() == Some(id.as_str()),
            Selector::Tag(tag) => self.tag.eq_ignore_ascii_case(tag),
            Selector::Placeholder {
                text,
                case_sensitive,
            } => {
                self.is_text_control()
                    && self.placeholder.as_deref().is_some_and(|p| {
                        if *case_sensitive {
                            p.contains(text.as_str())
                        } else {
                            p.to_lowercase().contains(&text.to_lowercase())
                        }
                    })
            }
            Selector::Or(parts) => {
                for part in parts {
                    if self.matches(part)? {
                        return Ok(true);
                    }
                }
                false
            }
            // Raw CSS is not interpreted by the in-memory page.
            Selector::Css(_) => false,
            Selector::Invalid(reason) => return Err(ReplayError::InvalidInput(reason.clone())),
        })
    }
}

/// Interaction recorded by a [`MockPage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Clicked { tag: String, label: String },
    ProgrammaticClick { tag: String, label: String },
    ValueSet { tag: String, label: String, value: String },
    FocusedValueSet { label: String, value: String },
    BroughtToFront,
}

#[derive(Debug, Default)]
struct PageState {
    elements: Vec<MockElement>,
    polls: u32,
    focused: Option<usize>,
    events: Vec<PageEvent>,
    closed: bool,
}

#[derive(Default)]
struct PageHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PageHandle>>>,
}

impl PageHub {
    fn publish(&self, page: PageHandle) {
        lock(&self.subscribers).retain(|tx| tx.send(page.clone()).is_ok());
    }
}

pub struct MockPage {
    url: String,
    state: Mutex<PageState>,
    hub: Mutex<Option<Arc<PageHub>>>,
}

impl std::fmt::Debug for MockPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPage").field("url", &self.url).finish_non_exhaustive()
    }
}

impl MockPage {
    /// A `body` element is added in front when `elements` has none.
    pub fn new(url: impl Into<String>, mut elements: Vec<MockElement>) -> Arc<Self> {
        if !elements.iter().any(|e| e.tag == "body") {
            elements.insert(0, MockElement::new("body"));
        }
        let focused = elements.iter().position(|e| e.focused);
        Arc::new(Self {
            url: url.into(),
            state: Mutex::new(PageState {
                elements,
                focused,
                ..Default::default()
            }),
            hub: Mutex::new(None),
        })
    }

    /// Interactions so far, oldest first.
    pub fn events(&self) -> Vec<PageEvent> {
        lock(&self.state).events.clone()
    }

    /// Current value of the first element whose placeholder or text is `label`.
    pub fn value_of(&self, label: &str) -> Option<String> {
        lock(&self.state)
            .elements
            .iter()
            .find(|e| e.tag != "body" && e.label() == label)
            .map(|e| e.value.clone())
    }

    /// Insert `element` at `position`, as a re-render would. A focused
    /// element keeps its focus.
    pub fn insert(&self, position: usize, element: MockElement) {
        let mut state = lock(&self.state);
        let position = position.min(state.elements.len());
        state.elements.insert(position, element);
        if let Some(focused) = state.focused.as_mut() {
            if *focused >= position {
                *focused += 1;
            }
        }
    }

    /// Simulate the tab going away; every later call fails.
    pub fn close(&self) {
        lock(&self.state).closed = true;
    }

    fn attach(&self, hub: Arc<PageHub>) {
        *lock(&self.hub) = Some(hub);
    }

    fn check_open(state: &PageState) -> Result<(), ReplayError> {
        if state.closed {
            Err(ReplayError::SessionFault("page has been closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn matching(state: &PageState, selector: &Selector) -> Result<Vec<usize>, ReplayError> {
        let mut found = Vec::new();
        for (i, element) in state.elements.iter().enumerate() {
            if element.appears_after <= state.polls && element.matches(selector)? {
                found.push(i);
            }
        }
        Ok(found)
    }

    fn resolve(state: &PageState, element: &ElementRef) -> Result<usize, ReplayError> {
        Self::check_open(state)?;
        Self::matching(state, element.selector())?
            .into_iter()
            .filter(|&i| {
                element
                    .text()
                    .map_or(true, |text| text.is_match(&state.elements[i].text))
            })
            .nth(element.index())
            .ok_or_else(|| ReplayError::ElementAction(format!("{element} is no longer attached")))
    }

    fn activate(&self, element: &ElementRef, pointer: bool) -> Result<(), ReplayError> {
        let opened = {
            let mut state = lock(&self.state);
            let i = Self::resolve(&state, element)?;
            let target = &state.elements[i];
            if pointer && target.covered {
                return Err(ReplayError::ElementAction(format!(
                    "{element} is covered by another element"
                )));
            }
            let (tag, label) = (target.tag.clone(), target.label());
            let opened = target.opens.clone();
            let crashes = target.crashes;
            if target.is_text_control() {
                state.focused = Some(i);
            }
            state.closed = crashes;
            state.events.push(if pointer {
                PageEvent::Clicked { tag, label }
            } else {
                PageEvent::ProgrammaticClick { tag, label }
            });
            opened
        };

        if let Some(page) = opened {
            let hub = lock(&self.hub).clone();
            if let Some(hub) = hub {
                page.attach(hub.clone());
                hub.publish(page);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn url(&self) -> Result<String, ReplayError> {
        Self::check_open(&lock(&self.state))?;
        Ok(self.url.clone())
    }

    async fn query_all(&self, selector: &Selector) -> Result<Vec<ElementRef>, ReplayError> {
        let mut state = lock(&self.state);
        Self::check_open(&state)?;
        state.polls += 1;
        let count = Self::matching(&state, selector)?.len();
        Ok((0..count)
            .map(|i| ElementRef::new(selector.clone(), i))
            .collect())
    }

    async fn text_content(&self, element: &ElementRef) -> Result<String, ReplayError> {
        let state = lock(&self.state);
        let i = Self::resolve(&state, element)?;
        Ok(state.elements[i].text.clone())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, ReplayError> {
        Err(ReplayError::SessionFault(
            "the in-memory page cannot evaluate scripts".to_string(),
        ))
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), ReplayError> {
        Self::resolve(&lock(&self.state), element).map(|_| ())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), ReplayError> {
        self.activate(element, true)
    }

    async fn programmatic_click(&self, element: &ElementRef) -> Result<(), ReplayError> {
        self.activate(element, false)
    }

    async fn set_controlled_value(
        &self,
        element: &ElementRef,
        text: &str,
    ) -> Result<(), ReplayError> {
        let mut state = lock(&self.state);
        let i = Self::resolve(&state, element)?;
        state.focused = Some(i);
        let target = &mut state.elements[i];
        target.value = text.to_string();
        let event = PageEvent::ValueSet {
            tag: target.tag.clone(),
            label: target.label(),
            value: text.to_string(),
        };
        state.events.push(event);
        Ok(())
    }

    async fn set_focused_value(&self, text: &str) -> Result<bool, ReplayError> {
        let mut state = lock(&self.state);
        Self::check_open(&state)?;
        let Some(i) = state.focused else {
            return Ok(false);
        };
        let target = &mut state.elements[i];
        target.value = text.to_string();
        let event = PageEvent::FocusedValueSet {
            label: target.label(),
            value: text.to_string(),
        };
        state.events.push(event);
        Ok(true)
    }

    async fn bring_to_front(&self) -> Result<(), ReplayError> {
        let mut state = lock(&self.state);
        Self::check_open(&state)?;
        state.events.push(PageEvent::BroughtToFront);
        Ok(())
    }
}

/// Engine serving pre-built [`MockPage`]s by URL.
#[derive(Default)]
pub struct MockEngine {
    pages: HashMap<String, Arc<MockPage>>,
    tab_events_fail: bool,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: Arc<MockPage>) -> Self {
        self.pages.insert(page.url.clone(), page);
        self
    }

    /// Subscribing to new pages fails with a non-fatal error, as when the
    /// browser refuses an event listener.
    pub fn without_tab_events(mut self) -> Self {
        self.tab_events_fail = true;
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    async fn launch_session(
        &self,
        _options: &LaunchOptions,
    ) -> Result<Box<dyn BrowserSession>, ReplayError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            pages: self.pages.clone(),
            hub: Arc::new(PageHub::default()),
            tab_events_fail: self.tab_events_fail,
            closes: self.closes.clone(),
        }))
    }
}

struct MockSession {
    pages: HashMap<String, Arc<MockPage>>,
    hub: Arc<PageHub>,
    tab_events_fail: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn open_page(&self, url: &str) -> Result<PageHandle, ReplayError> {
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| ReplayError::NavigationFailure {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            })?;
        page.attach(self.hub.clone());
        Ok(page)
    }

    async fn subscribe_new_pages(&self) -> Result<NewPageSubscription, ReplayError> {
        if self.tab_events_fail {
            return Err(ReplayError::ElementAction(
                "target event listener rejected".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.hub.subscribers).push(tx);
        Ok(NewPageSubscription::new(rx, CancellationToken::new()))
    }

    async fn close(&self) -> Result<(), ReplayError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TextMatch;

    #[tokio::test]
    async fn test_late_elements_appear_after_polls() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::button("Save").appears_after(2)],
        );
        let buttons = Selector::tag("button");
        assert!(page.query_all(&buttons).await.unwrap().is_empty());
        assert_eq!(page.query_all(&buttons).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_covered_element_rejects_pointer_click_only() {
        let page = MockPage::new("https://app.test", vec![MockElement::button("Go").covered()]);
        let refs = page.query_all(&Selector::tag("button")).await.unwrap();
        assert!(page.click(&refs[0]).await.is_err());
        page.programmatic_click(&refs[0]).await.unwrap();
        assert_eq!(
            page.events(),
            vec![PageEvent::ProgrammaticClick {
                tag: "button".into(),
                label: "Go".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_clicking_opener_publishes_page() {
        let target = MockPage::new("https://target.test", vec![]);
        let origin = MockPage::new(
            "https://origin.test",
            vec![MockElement::link("Open").opens(target.clone())],
        );
        let engine = MockEngine::new().with_page(origin);
        let session = engine
            .launch_session(&LaunchOptions::default())
            .await
            .unwrap();
        let page = session.open_page("https://origin.test").await.unwrap();
        let mut subscription = session.subscribe_new_pages().await.unwrap();

        let links = page.query_all(&Selector::tag("a")).await.unwrap();
        page.click(&links[0]).await.unwrap();

        let opened = subscription.next_page().await.unwrap();
        assert_eq!(opened.url().await.unwrap(), "https://target.test");
    }

    #[tokio::test]
    async fn test_text_ref_ignores_siblings_with_other_text() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::button("Cancel"), MockElement::button("Submit")],
        );
        let submit = page
            .find_by_text(&Selector::tag("button"), TextMatch::contains("submit"))
            .await
            .unwrap()
            .unwrap();

        page.insert(1, MockElement::button("Back"));
        page.insert(0, MockElement::button("Help"));
        assert_eq!(page.text_content(&submit).await.unwrap(), "Submit");
    }

    #[tokio::test]
    async fn test_unknown_url_fails_navigation() {
        let engine = MockEngine::new();
        let session = engine
            .launch_session(&LaunchOptions::default())
            .await
            .unwrap();
        let err = session.open_page("https://nowhere.test").await.err().expect("expected navigation failure");
        assert!(matches!(err, ReplayError::NavigationFailure { .. }));
    }

    #[tokio::test]
    async fn test_closed_page_faults() {
        let page = MockPage::new("https://app.test", vec![]);
        page.close();
        let err = page.query_all(&Selector::tag("a")).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
