//! Replay of recorded UI workflows against a live web application.
//!
//! A workflow page lists steps such as `1. Click on Email` or
//! `2. Type "foo@bar.com"`. [`WorkflowRunner`] opens the page in a browser,
//! reads those steps, follows the link to the application under test and
//! performs each step there, reporting progress through an [`ExecutionLog`].

pub mod action;
pub mod browser_script;
#[cfg(feature = "chrome")]
pub mod chrome;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod injector;
pub mod log;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod selector;
pub mod step;
pub mod switcher;

pub use action::{interpret, Action};
#[cfg(feature = "chrome")]
pub use chrome::ChromeEngine;
pub use config::{LaunchOptions, ReplayConfig, SwitchConfig};
pub use context::ExecutionContext;
pub use engine::{
    BrowserEngine, BrowserPage, BrowserSession, ElementRef, NewPageSubscription, PageHandle,
    TextMatch,
};
pub use errors::ReplayError;
pub use injector::InputInjector;
pub use log::{ChannelSink, ExecutionLog, LogEntry, LogLevel, LogSink};
pub use resolver::{ElementResolver, ResolutionOutcome, Strategy};
pub use retry::{resolve_with_retry, Retried, RetryPolicy};
pub use runner::{RunReport, RunState, RunStatus, WorkflowRunner};
pub use selector::Selector;
pub use step::{StepExtractor, WorkflowStep};
pub use switcher::{SwitchOutcome, TargetSwitcher};
pub use tokio_util::sync::CancellationToken;
