//! Following the workflow into the tab it opens.

use tracing::{debug, instrument};

use crate::config::SwitchConfig;
use crate::context::ExecutionContext;
use crate::engine::{
    BrowserPage, BrowserSession, ElementRef, NewPageSubscription, PageHandle, TextMatch,
};
use crate::errors::ReplayError;
use crate::log::ExecutionLog;
use crate::selector::Selector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// `active_page` now points at the page with this URL.
    Switched { url: String },
    /// The workflow page stays active.
    Stayed { reason: String },
}

#[derive(Debug, Clone)]
pub struct TargetSwitcher {
    config: SwitchConfig,
}

impl TargetSwitcher {
    pub fn new(config: SwitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// Click the "open" link of the workflow page and move to the tab it opens.
    ///
    /// Only a fault of the current page is returned as an error. Every other
    /// problem leaves the context untouched and is logged as a warning.
    #[instrument(level = "debug", skip_all, fields(link = %self.config.link_text))]
    pub async fn switch_to_target(
        &self,
        session: &dyn BrowserSession,
        ctx: &mut ExecutionContext,
        log: &ExecutionLog,
    ) -> Result<SwitchOutcome, ReplayError> {
        let page = ctx.active_page.clone();
        let Some(link) = self.find_link(&*page).await? else {
            return Ok(self.stay(
                log,
                format!("No \"{}\" link found, staying on the current page", self.config.link_text),
            ));
        };

        let mut subscription = match session.subscribe_new_pages().await {
            Ok(subscription) => subscription,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.stay(log, format!("Cannot watch for new tabs: {e}"))),
        };
        let (clicked, opened) = tokio::join!(
            click_link(&*page, &link),
            subscription.next_page_within(self.config.timeout),
        );
        subscription.unsubscribe();

        if let Err(e) = clicked {
            if e.is_fatal() {
                return Err(e);
            }
            return Ok(self.stay(log, format!("Opening the target page failed: {e}")));
        }
        let Some(target) = opened else {
            return Ok(self.stay(log, ReplayError::SwitchTimeout(self.config.timeout).to_string()));
        };

        match self.adopt(target, ctx).await {
            Ok(url) => {
                log.info(None, format!("Switched to target page: {url}"));
                Ok(SwitchOutcome::Switched { url })
            }
            Err(e) => Ok(self.stay(log, format!("Target page never became ready: {e}"))),
        }
    }

    /// Subscription to open before a step click when new tabs are followed.
    ///
    /// A subscription that cannot be set up only costs tab following for this
    /// click, so it is logged and the click goes ahead without it.
    pub async fn watch(
        &self,
        session: &dyn BrowserSession,
        log: &ExecutionLog,
        step: Option<usize>,
    ) -> Result<Option<NewPageSubscription>, ReplayError> {
        if !self.config.follow_new_tabs {
            return Ok(None);
        }
        match session.subscribe_new_pages().await {
            Ok(subscription) => Ok(Some(subscription)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log.warn(step, format!("Not following new tabs for this click: {e}"));
                Ok(None)
            }
        }
    }

    /// After a step click: if a tab opened within the grace period, make it
    /// the active page.
    pub async fn follow_opened(
        &self,
        mut subscription: NewPageSubscription,
        ctx: &mut ExecutionContext,
        log: &ExecutionLog,
        step: Option<usize>,
    ) -> Option<String> {
        let page = subscription.next_page_within(self.config.new_tab_grace).await?;
        match self.adopt(page, ctx).await {
            Ok(url) => {
                log.info(step, format!("Switched to new tab: {url}"));
                Some(url)
            }
            Err(e) => {
                log.warn(step, format!("New tab was not usable: {e}"));
                None
            }
        }
    }

    async fn find_link(&self, page: &dyn BrowserPage) -> Result<Option<ElementRef>, ReplayError> {
        page.find_by_text(&Selector::tag("a"), TextMatch::equals(&self.config.link_text))
            .await
    }

    async fn adopt(&self, page: PageHandle, ctx: &mut ExecutionContext) -> Result<String, ReplayError> {
        page.bring_to_front().await?;
        page.wait_for_selector(&Selector::tag("body"), self.config.ready_timeout)
            .await?;
        let url = page.url().await?;
        ctx.switch_to(page);
        Ok(url)
    }

    fn stay(&self, log: &ExecutionLog, reason: String) -> SwitchOutcome {
        log.warn(None, reason.clone());
        SwitchOutcome::Stayed { reason }
    }
}

async fn click_link(page: &dyn BrowserPage, link: &ElementRef) -> Result<(), ReplayError> {
    match page.click(link).await {
        Err(e) if !e.is_fatal() => {
            debug!(%link, error = %e, "pointer click on link failed, using element.click()");
            page.programmatic_click(link).await
        }
        other => other,
    }
}
