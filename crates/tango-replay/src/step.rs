use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::engine::BrowserPage;
use crate::errors::ReplayError;
use crate::selector::Selector;

/// One recorded step, as read from the workflow editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStep {
    /// 1-based position in extraction order.
    pub index: usize,
    pub raw_text: String,
}

/// Reads the ordered step titles from a workflow page.
#[derive(Debug, Clone)]
pub struct StepExtractor {
    selector: Selector,
    timeout: Duration,
}

impl StepExtractor {
    pub fn new(selector: impl Into<Selector>, timeout: Duration) -> Self {
        Self {
            selector: selector.into(),
            timeout,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    #[instrument(level = "debug", skip(self, page), fields(selector = %self.selector))]
    pub async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<WorkflowStep>, ReplayError> {
        page.wait_for_selector(&self.selector, self.timeout)
            .await
            .map_err(|e| match e {
                ReplayError::Timeout { .. } => ReplayError::ExtractionTimeout {
                    selector: self.selector.to_string(),
                    timeout: self.timeout,
                },
                other => other,
            })?;

        let mut steps = Vec::new();
        for element in page.query_all(&self.selector).await? {
            let text = page.text_content(&element).await?;
            steps.push(WorkflowStep {
                index: steps.len() + 1,
                raw_text: text.trim().to_string(),
            });
        }
        debug!(count = steps.len(), "extracted workflow steps");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STEP_SELECTOR;
    use crate::mock::{MockElement, MockPage};

    #[tokio::test(start_paused = true)]
    async fn test_extracts_trimmed_titles_in_order() {
        let page = MockPage::new(
            "https://tango.test/workflow",
            vec![
                MockElement::step_title("  1. Click on Email \n").appears_after(3),
                MockElement::button("Share"),
                MockElement::step_title("2. Type \"foo@bar.com\"").appears_after(3),
            ],
        );
        let extractor = StepExtractor::new(DEFAULT_STEP_SELECTOR, Duration::from_secs(30));
        let steps = extractor.extract(&*page).await.unwrap();
        assert_eq!(
            steps,
            vec![
                WorkflowStep {
                    index: 1,
                    raw_text: "1. Click on Email".into()
                },
                WorkflowStep {
                    index: 2,
                    raw_text: "2. Type \"foo@bar.com\"".into()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container_times_out() {
        let page = MockPage::new("https://tango.test/empty", vec![MockElement::button("Share")]);
        let extractor = StepExtractor::new(DEFAULT_STEP_SELECTOR, Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        let err = extractor.extract(&*page).await.unwrap_err();
        assert!(matches!(err, ReplayError::ExtractionTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
