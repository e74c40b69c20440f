use crate::engine::{ElementRef, PageHandle};

/// Mutable state of one replay run, threaded through every step handler.
pub struct ExecutionContext {
    /// Page the steps currently act on.
    pub active_page: PageHandle,
    /// Input focused by the latest successful input click; a following
    /// `Type` step writes into it.
    pub last_resolved: Option<ElementRef>,
}

impl ExecutionContext {
    pub fn new(active_page: PageHandle) -> Self {
        Self {
            active_page,
            last_resolved: None,
        }
    }

    /// Make `page` the active page. `last_resolved` is kept: it is a
    /// selector-based reference and is looked up again on the new page.
    pub fn switch_to(&mut self, page: PageHandle) {
        self.active_page = page;
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("last_resolved", &self.last_resolved)
            .finish_non_exhaustive()
    }
}
