//! Run orchestration: session lifecycle, step loop and teardown.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::action::{interpret, strip_ordinal, Action};
use crate::config::ReplayConfig;
use crate::context::ExecutionContext;
use crate::engine::{BrowserEngine, BrowserSession};
use crate::errors::ReplayError;
use crate::injector::InputInjector;
use crate::log::{ExecutionLog, LogEntry};
use crate::resolver::{ElementResolver, ResolutionOutcome};
use crate::step::{StepExtractor, WorkflowStep};
use crate::switcher::TargetSwitcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    SessionOpening,
    Extracting,
    Switching,
    PerStep,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Everything a finished run produced. Steps and log entries collected before
/// a failure are kept.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub url: String,
    pub status: RunStatus,
    /// `Completed`, or the state the run failed in.
    pub state: RunState,
    pub steps: Vec<String>,
    pub logs: Vec<String>,
    pub entries: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[derive(Debug)]
struct Progress {
    state: RunState,
    steps: Vec<WorkflowStep>,
}

impl Progress {
    fn enter(&mut self, state: RunState) {
        debug!(from = ?self.state, to = ?state, "run state");
        self.state = state;
    }
}

/// Replays workflows. One instance can serve any number of runs, each with
/// its own browser session.
pub struct WorkflowRunner {
    engine: Arc<dyn BrowserEngine>,
    config: ReplayConfig,
    extractor: StepExtractor,
    resolver: ElementResolver,
    injector: InputInjector,
    switcher: TargetSwitcher,
}

impl WorkflowRunner {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: ReplayConfig) -> Self {
        Self {
            extractor: StepExtractor::new(config.step_selector.as_str(), config.extraction_timeout),
            resolver: ElementResolver::new(
                config.retry,
                config.placeholder_case_sensitive,
                config.click_settle,
            ),
            injector: InputInjector::new(config.type_settle),
            switcher: TargetSwitcher::new(config.switch.clone()),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay the workflow at `url`, emitting into `log` as it goes.
    ///
    /// Never panics on run failures: every error ends up in the report. A
    /// launched session is closed exactly once, whether the run completes,
    /// fails or is cancelled through `cancel`.
    #[instrument(skip(self, log, cancel))]
    pub async fn run(&self, url: &str, log: ExecutionLog, cancel: CancellationToken) -> RunReport {
        let url = url.trim();
        let mut progress = Progress {
            state: RunState::Idle,
            steps: Vec::new(),
        };

        let result = if url.is_empty() {
            log.error(None, "Missing URL");
            Err(ReplayError::InvalidInput("Missing URL".to_string()))
        } else {
            self.run_session(url, &log, &cancel, &mut progress).await
        };

        let ended_in = progress.state;
        let error = match result {
            Ok(()) => {
                progress.enter(RunState::Completed);
                info!(url, steps = progress.steps.len(), "workflow replay completed");
                None
            }
            Err(e) => {
                progress.enter(RunState::Failed);
                warn!(url, error = %e, state = ?ended_in, "workflow replay failed");
                Some(e.to_string())
            }
        };

        let entries = log.into_entries();
        RunReport {
            url: url.to_string(),
            status: if error.is_none() {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            state: if error.is_none() {
                RunState::Completed
            } else {
                ended_in
            },
            steps: progress.steps.into_iter().map(|s| s.raw_text).collect(),
            logs: entries.iter().map(LogEntry::render).collect(),
            entries,
            error,
        }
    }

    async fn run_session(
        &self,
        url: &str,
        log: &ExecutionLog,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<(), ReplayError> {
        progress.enter(RunState::SessionOpening);
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplayError::Cancelled),
            session = self.engine.launch_session(&self.config.launch) => session?,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReplayError::Cancelled),
            outcome = self.drive(url, &*session, log, progress) => outcome,
        };

        if let Err(e) = &outcome {
            log.scoped_error("main", e.to_string());
        }
        if let Err(e) = session.close().await {
            warn!(error = %e, "closing the browser session failed");
        }
        if outcome.is_ok() {
            log.info(None, "=== ALL STEPS DONE ===");
        }
        outcome
    }

    async fn drive(
        &self,
        url: &str,
        session: &dyn BrowserSession,
        log: &ExecutionLog,
        progress: &mut Progress,
    ) -> Result<(), ReplayError> {
        log.info(None, "Opening page...");
        let page = session.open_page(url).await?;
        log.info(None, "Page loaded");

        progress.enter(RunState::Extracting);
        progress.steps = self.extractor.extract(&*page).await?;
        let titles: Vec<&str> = progress.steps.iter().map(|s| s.raw_text.as_str()).collect();
        log.info(None, format!("Steps: {}", titles.join(", ")));

        let mut ctx = ExecutionContext::new(page);
        if self.config.switch.enabled {
            progress.enter(RunState::Switching);
            self.switcher.switch_to_target(session, &mut ctx, log).await?;
        }

        progress.enter(RunState::PerStep);
        for step in &progress.steps {
            self.run_step(step, session, &mut ctx, log).await?;
            tokio::time::sleep(self.config.step_delay).await;
        }

        tokio::time::sleep(self.config.final_pause).await;
        Ok(())
    }

    /// One step. Only fatal errors are returned; everything else is logged.
    #[instrument(level = "debug", skip_all, fields(step = step.index))]
    async fn run_step(
        &self,
        step: &WorkflowStep,
        session: &dyn BrowserSession,
        ctx: &mut ExecutionContext,
        log: &ExecutionLog,
    ) -> Result<(), ReplayError> {
        let index = Some(step.index);
        let text = strip_ordinal(&step.raw_text).trim();
        log.info(index, format!("=== START step: {text} ==="));

        let result = match interpret(&step.raw_text) {
            Action::Click { target_text } => {
                self.click(&target_text, session, ctx, log, index).await
            }
            Action::Type { text: payload } => self
                .injector
                .inject(&payload, ctx)
                .await
                .map(|_| log.info(index, format!("Typed: \"{payload}\""))),
            Action::Unknown { raw_text } => {
                log.debug(index, format!("No action for step: {raw_text}"));
                Ok(())
            }
        };

        match result {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log.error(index, e.to_string()),
            Ok(()) => {}
        }

        log.info(index, format!("=== DONE step: {text} ==="));
        Ok(())
    }

    async fn click(
        &self,
        target_text: &str,
        session: &dyn BrowserSession,
        ctx: &mut ExecutionContext,
        log: &ExecutionLog,
        index: Option<usize>,
    ) -> Result<(), ReplayError> {
        let watch = self.switcher.watch(session, log, index).await?;

        match self.resolver.resolve(target_text, ctx, log, index).await? {
            ResolutionOutcome::Found { strategy, .. } => {
                log.info(index, format!("Clicked {strategy}: {target_text}"));
                if let Some(subscription) = watch {
                    self.switcher.follow_opened(subscription, ctx, log, index).await;
                }
                Ok(())
            }
            ResolutionOutcome::NotFound => Err(ReplayError::ResolutionFailure(target_text.to_string())),
        }
    }
}
