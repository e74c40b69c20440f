//! Text entry for `Type "..."` steps.
//!
//! Apps built on controlled inputs ignore a plain `value` assignment, so text
//! goes through the native value setter followed by a bubbling `input` event.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::context::ExecutionContext;
use crate::errors::ReplayError;

/// Where the text ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionTarget {
    /// The input resolved by the latest input click.
    LastResolved,
    /// Whatever held keyboard focus.
    Focused,
}

#[derive(Debug, Clone)]
pub struct InputInjector {
    settle: Duration,
}

impl InputInjector {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// Write `text` into the last resolved input, or into the focused element
    /// when there is none. Fails with [`ReplayError::InjectionFailure`] when
    /// neither exists.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn inject(
        &self,
        text: &str,
        ctx: &ExecutionContext,
    ) -> Result<InjectionTarget, ReplayError> {
        let page = &ctx.active_page;

        if let Some(element) = &ctx.last_resolved {
            match page.set_controlled_value(element, text).await {
                Ok(()) => {
                    tokio::time::sleep(self.settle).await;
                    return Ok(InjectionTarget::LastResolved);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(%element, error = %e, "last resolved input unusable, using focus"),
            }
        }

        if page.set_focused_value(text).await? {
            tokio::time::sleep(self.settle).await;
            Ok(InjectionTarget::Focused)
        } else {
            Err(ReplayError::InjectionFailure(text.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ElementRef;
    use crate::mock::{MockElement, MockPage, PageEvent};
    use crate::selector::Selector;

    fn injector() -> InputInjector {
        InputInjector::new(Duration::from_millis(200))
    }

    #[tokio::test(start_paused = true)]
    async fn test_types_into_last_resolved_input() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::input("Email"), MockElement::textarea("Notes").focused()],
        );
        let mut ctx = ExecutionContext::new(page.clone());
        ctx.last_resolved = Some(ElementRef::new(Selector::placeholder("Email", true), 0));

        let target = injector().inject("foo@bar.com", &ctx).await.unwrap();

        assert_eq!(target, InjectionTarget::LastResolved);
        assert_eq!(page.value_of("Email").as_deref(), Some("foo@bar.com"));
        assert_eq!(page.value_of("Notes").as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_focused_element() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::textarea("Notes").focused()],
        );
        let ctx = ExecutionContext::new(page.clone());

        let target = injector().inject("hello", &ctx).await.unwrap();

        assert_eq!(target, InjectionTarget::Focused);
        assert_eq!(
            page.events(),
            vec![PageEvent::FocusedValueSet {
                label: "Notes".into(),
                value: "hello".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_input_falls_back_to_focus() {
        let page = MockPage::new(
            "https://app.test",
            vec![MockElement::input("Search").focused()],
        );
        let mut ctx = ExecutionContext::new(page.clone());
        ctx.last_resolved = Some(ElementRef::new(Selector::placeholder("Email", true), 0));

        let target = injector().inject("shoes", &ctx).await.unwrap();

        assert_eq!(target, InjectionTarget::Focused);
        assert_eq!(page.value_of("Search").as_deref(), Some("shoes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_type_into() {
        let page = MockPage::new("https://app.test", vec![MockElement::button("Go")]);
        let ctx = ExecutionContext::new(page.clone());

        let err = injector().inject("x", &ctx).await.unwrap_err();

        assert!(matches!(err, ReplayError::InjectionFailure(ref t) if t == "x"));
        assert!(page.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_text_is_written() {
        let page = MockPage::new("https://app.test", vec![MockElement::input("Email")]);
        let mut ctx = ExecutionContext::new(page.clone());
        ctx.last_resolved = Some(ElementRef::new(Selector::placeholder("Email", true), 0));

        injector().inject("", &ctx).await.unwrap();

        assert_eq!(
            page.events(),
            vec![PageEvent::ValueSet {
                tag: "input".into(),
                label: "Email".into(),
                value: String::new()
            }]
        );
    }
}
