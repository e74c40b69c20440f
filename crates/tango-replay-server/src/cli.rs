use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tango_replay::ReplayConfig;

use crate::logging::default_log_dir;

#[derive(Parser, Debug)]
#[command(name = "tango-replay")]
#[command(version, about = "Replay recorded Tango workflows in a real browser")]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the replay endpoints over HTTP
    Serve(ServeArgs),
    /// Replay one workflow and print its log
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to daily-rolling files
    #[clap(long, global = true)]
    pub log_to_file: bool,

    /// Directory for log files; implies --log-to-file
    #[clap(long, global = true, env = "TANGO_REPLAY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn file_dir(&self) -> Option<PathBuf> {
        match (&self.log_dir, self.log_to_file) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(default_log_dir()),
            (None, false) => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[clap(short, long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// URL of the recorded workflow
    pub url: String,

    /// Print the final report as JSON after the log
    #[clap(long)]
    pub json: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Settings shared by every command that drives a browser.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// JSON replay config; flags below override its values
    #[clap(long, env = "TANGO_REPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run Chrome without a window
    #[clap(long)]
    pub headless: bool,

    /// Pause before every browser input action, in milliseconds
    #[clap(long)]
    pub slow_mo_ms: Option<u64>,

    /// Chrome/Chromium executable to launch
    #[clap(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Replay on the workflow page instead of following its "Open" link
    #[clap(long)]
    pub no_switch: bool,
}

impl EngineArgs {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> Result<ReplayConfig> {
        let mut config = match &self.config {
            Some(path) => ReplayConfig::from_file(path)
                .with_context(|| format!("loading replay config {}", path.display()))?,
            None => ReplayConfig::default(),
        };
        if self.headless {
            config.launch.headless = true;
        }
        if let Some(ms) = self.slow_mo_ms {
            config.launch.slow_mo = Duration::from_millis(ms);
        }
        if let Some(path) = &self.chrome_path {
            config.launch.executable = Some(path.clone());
        }
        if self.no_switch {
            config.switch.enabled = false;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_parses_url_and_overrides() {
        let cli = Cli::parse_from([
            "tango-replay",
            "run",
            "https://app.tango.us/app/workflow/abc",
            "--headless",
            "--slow-mo-ms",
            "0",
            "-v",
        ]);
        assert!(cli.logging.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.url, "https://app.tango.us/app/workflow/abc");
        let config = args.engine.load_config().unwrap();
        assert!(config.launch.headless);
        assert_eq!(config.launch.slow_mo, Duration::ZERO);
        assert!(config.switch.enabled);
    }

    #[test]
    fn test_config_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"launch": {{"slow_mo": 50}}, "final_pause": 0, "placeholder_case_sensitive": false}}"#
        )
        .unwrap();

        let args = EngineArgs {
            config: Some(file.path().to_path_buf()),
            no_switch: true,
            ..EngineArgs::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.launch.slow_mo, Duration::from_millis(50));
        assert_eq!(config.final_pause, Duration::ZERO);
        assert!(!config.placeholder_case_sensitive);
        assert!(!config.switch.enabled);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = EngineArgs {
            config: Some(PathBuf::from("/nonexistent/tango.json")),
            ..EngineArgs::default()
        };
        let err = args.load_config().unwrap_err();
        assert!(err.to_string().contains("loading replay config"));
    }

    #[test]
    fn test_log_dir_implies_file_logging() {
        let args = LoggingArgs {
            verbose: false,
            log_to_file: false,
            log_dir: Some(PathBuf::from("/tmp/tango-logs")),
        };
        assert_eq!(args.file_dir(), Some(PathBuf::from("/tmp/tango-logs")));
        let args = LoggingArgs {
            log_dir: None,
            log_to_file: true,
            ..args
        };
        assert_eq!(args.file_dir(), Some(default_log_dir()));
    }
}
