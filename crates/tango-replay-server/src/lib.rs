//! Transports for the replay engine: an axum server and a clap CLI.

pub mod cli;
pub mod logging;
pub mod server;

pub use server::{router, start_server, AppState};
