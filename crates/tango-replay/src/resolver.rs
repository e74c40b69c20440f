//! Click target resolution.
//!
//! Recorded clicks either focus a field or press a button, so two strategies
//! are tried in that order, each with bounded retries: the target app renders
//! dynamically and the element may not exist yet when the step starts.

use std::time::Duration;

use serde::Serialize;
use tracing::instrument;

use crate::context::ExecutionContext;
use crate::engine::{BrowserPage, ElementRef, TextMatch};
use crate::errors::ReplayError;
use crate::log::ExecutionLog;
use crate::retry::{resolve_with_retry, Retried, RetryPolicy};
use crate::selector::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `input`/`textarea` whose placeholder contains the target text.
    InputPlaceholder,
    /// `button` whose text contains the target text, ignoring case.
    ButtonText,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::InputPlaceholder => write!(f, "input"),
            Strategy::ButtonText => write!(f, "button"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Found {
        element: ElementRef,
        strategy: Strategy,
    },
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ElementResolver {
    policy: RetryPolicy,
    placeholder_case_sensitive: bool,
    click_settle: Duration,
}

impl ElementResolver {
    pub fn new(policy: RetryPolicy, placeholder_case_sensitive: bool, click_settle: Duration) -> Self {
        Self {
            policy,
            placeholder_case_sensitive,
            click_settle,
        }
    }

    /// Find and click the element a `Click on <target>` step refers to.
    ///
    /// A hit by the input strategy becomes the context's `last_resolved`.
    #[instrument(level = "debug", skip(self, ctx, log))]
    pub async fn resolve(
        &self,
        target_text: &str,
        ctx: &mut ExecutionContext,
        log: &ExecutionLog,
        step: Option<usize>,
    ) -> Result<ResolutionOutcome, ReplayError> {
        let page = ctx.active_page.clone();

        for strategy in [Strategy::InputPlaceholder, Strategy::ButtonText] {
            if let Some(element) = self
                .run_strategy(strategy, &*page, target_text, log, step)
                .await?
            {
                if strategy == Strategy::InputPlaceholder {
                    ctx.last_resolved = Some(element.clone());
                }
                return Ok(ResolutionOutcome::Found { element, strategy });
            }
        }
        Ok(ResolutionOutcome::NotFound)
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        page: &dyn BrowserPage,
        target_text: &str,
        log: &ExecutionLog,
        step: Option<usize>,
    ) -> Result<Option<ElementRef>, ReplayError> {
        let outcome = resolve_with_retry(
            &self.policy,
            |_| async move {
                match self.locate(strategy, page, target_text).await? {
                    Some(element) => {
                        self.activate(page, &element).await?;
                        Ok(Some(element))
                    }
                    None => Ok(None),
                }
            },
            |attempt, err| {
                if let Some(err) = err {
                    log.debug(
                        step,
                        format!("{strategy} attempt {attempt} failed for {target_text}: {err}"),
                    );
                }
            },
        )
        .await?;

        match outcome {
            Retried::Found { value, attempts } => {
                log.debug(
                    step,
                    format!("{strategy} resolved for {target_text} after {attempts} attempt(s)"),
                );
                Ok(Some(value))
            }
            Retried::Exhausted { attempts } => {
                log.debug(
                    step,
                    format!("{strategy} lookup FAILED for {target_text} after {attempts} attempts"),
                );
                Ok(None)
            }
        }
    }

    /// First match in document order.
    async fn locate(
        &self,
        strategy: Strategy,
        page: &dyn BrowserPage,
        target_text: &str,
    ) -> Result<Option<ElementRef>, ReplayError> {
        match strategy {
            Strategy::InputPlaceholder => {
                let selector = Selector::placeholder(target_text, self.placeholder_case_sensitive);
                Ok(page.query_all(&selector).await?.into_iter().next())
            }
            Strategy::ButtonText => {
                page.find_by_text(&Selector::tag("button"), TextMatch::contains(target_text))
                    .await
            }
        }
    }

    async fn activate(&self, page: &dyn BrowserPage, element: &ElementRef) -> Result<(), ReplayError> {
        page.scroll_into_view(element).await?;
        if let Err(e) = page.click(element).await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::debug!(%element, error = %e, "pointer click failed, falling back to element.click()");
            page.programmatic_click(element).await?;
        }
        tokio::time::sleep(self.click_settle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockElement, MockPage, PageEvent};
    use std::sync::Arc;

    fn resolver() -> ElementResolver {
        ElementResolver::new(RetryPolicy::default(), true, Duration::from_millis(200))
    }

    fn context(page: &Arc<MockPage>) -> ExecutionContext {
        ExecutionContext::new(page.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_by_placeholder_sets_last_resolved() {
        let page = MockPage::new(
            "https://app.test",
            vec![
                MockElement::button("Email me"),
                MockElement::input("Enter your Email address"),
            ],
        );
        let mut ctx = context(&page);
        let log = ExecutionLog::new();

        let outcome = resolver().resolve("Email", &mut ctx, &log, Some(1)).await.unwrap();

        match outcome {
            ResolutionOutcome::Found { strategy, element } => {
                assert_eq!(strategy, Strategy::InputPlaceholder);
                assert_eq!(ctx.last_resolved, Some(element));
            }
            other => panic!("Expected input hit, got: {other:?}"),
        }
        assert_eq!(
            page.events(),
            vec![PageEvent::Clicked {
                tag: "input".into(),
                label: "Enter your Email address".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_match_is_case_sensitive_by_default() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::input("email"), MockElement::button("EMAIL")],
        );
        let mut ctx = context(&page);
        let outcome = resolver()
            .resolve("Email", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ResolutionOutcome::Found {
                strategy: Strategy::ButtonText,
                ..
            }
        ));
        assert!(ctx.last_resolved.is_none());

        let insensitive = ElementResolver::new(RetryPolicy::default(), false, Duration::ZERO);
        let outcome = insensitive
            .resolve("Email", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ResolutionOutcome::Found {
                strategy: Strategy::InputPlaceholder,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_fallback_keeps_previous_input() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::input("Email"), MockElement::button("Continue")],
        );
        let mut ctx = context(&page);
        let log = ExecutionLog::new();
        resolver().resolve("Email", &mut ctx, &log, Some(1)).await.unwrap();
        let carried = ctx.last_resolved.clone();

        let outcome = resolver().resolve("continue", &mut ctx, &log, Some(2)).await.unwrap();
        assert!(matches!(
            outcome,
            ResolutionOutcome::Found {
                strategy: Strategy::ButtonText,
                ..
            }
        ));
        assert!(carried.is_some());
        assert_eq!(ctx.last_resolved, carried);
    }

    #[tokio::test(start_paused = true)]
    async fn test_covered_element_gets_programmatic_click() {
        let page = MockPage::new("https://app.test", vec![MockElement::button("Submit").covered()]);
        let mut ctx = context(&page);
        resolver()
            .resolve("Submit", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();
        assert_eq!(
            page.events(),
            vec![PageEvent::ProgrammaticClick {
                tag: "button".into(),
                label: "Submit".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_element_found_by_retry() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::input("Password").appears_after(3)],
        );
        let mut ctx = context(&page);
        let outcome = resolver()
            .resolve("Password", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ResolutionOutcome::Found {
                strategy: Strategy::InputPlaceholder,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_after_both_strategies() {
        let page = MockPage::new("https://app.test", vec![MockElement::button("Cancel")]);
        let mut ctx = context(&page);
        let start = tokio::time::Instant::now();
        let outcome = resolver()
            .resolve("Checkout", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome, ResolutionOutcome::NotFound);
        assert!(start.elapsed() >= Duration::from_millis(10 * 300));
        assert!(page.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_in_document_order() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::button("Next step"), MockElement::button("Next")],
        );
        let mut ctx = context(&page);
        resolver()
            .resolve("Next", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();
        assert_eq!(
            page.events(),
            vec![PageEvent::Clicked {
                tag: "button".into(),
                label: "Next step".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_hit_is_pinned_to_its_text() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::button("Back"), MockElement::button("Submit order")],
        );
        let mut ctx = context(&page);
        let outcome = resolver()
            .resolve("Submit", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap();

        let ResolutionOutcome::Found { element, strategy } = outcome else {
            panic!("expected the button to resolve");
        };
        assert_eq!(strategy, Strategy::ButtonText);
        assert_eq!(element.text(), Some(&TextMatch::contains("submit")));
        assert_eq!(element.index(), 0);

        page.insert(1, MockElement::button("Help"));
        assert_eq!(page.text_content(&element).await.unwrap(), "Submit order");
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_page_is_fatal() {
        let page = MockPage::new("https://app.test", vec![MockElement::button("Next")]);
        page.close();
        let mut ctx = context(&page);
        let err = resolver()
            .resolve("Next", &mut ctx, &ExecutionLog::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::SessionFault(_)));
    }
}
