//! # ember-relay
//!
//! Effect relay server binary: wires telemetry, configuration and the
//! WebSocket server, then runs until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ember_server::config::{load_config, ServerConfig};
use ember_server::metrics::install_recorder;
use ember_server::RelayServer;
use ember_telemetry::{init_telemetry, parse_module_level, LogFormat, TelemetryConfig};
use tracing::{info, warn, Level};

/// WebSocket effect relay server.
#[derive(Parser, Debug)]
#[command(name = "ember-relay", about = "WebSocket effect relay server")]
struct Cli {
    /// Host to bind. Overrides the config file and `RELAY_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign). Overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// JSON config file merged over the built-in defaults.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log output: json, pretty or compact.
    #[arg(long, default_value = "json", env = "RELAY_LOG_FORMAT")]
    log_format: LogFormat,

    /// Default log level. `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Per-module level, e.g. `ember_server=debug`. Repeatable.
    #[arg(long = "log-module", value_name = "TARGET=LEVEL", value_parser = parse_module_level)]
    log_modules: Vec<(String, Level)>,
}

impl Cli {
    fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            module_levels: self.log_modules.clone(),
            format: self.log_format,
        }
    }

    /// Flags win over file and environment.
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&cli.telemetry()).context("failed to initialize logging")?;

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let handle = RelayServer::new(config, metrics)
        .start()
        .await
        .context("failed to start relay server")?;

    info!(
        "effect relay listening on ws://{}/ws",
        handle.local_addr()
    );

    wait_for_signal().await?;

    info!("shutting down");
    handle.stop(None).await;
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
            _ = term.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_leave_config_untouched() {
        let cli = Cli::try_parse_from(["ember-relay"]).unwrap();
        let mut config = ServerConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(cli.log_level, Level::INFO);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "ember-relay",
            "--host",
            "127.0.0.1",
            "--port",
            "9100",
            "--log-format",
            "compact",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let mut config = ServerConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9100);

        let telemetry = cli.telemetry();
        assert_eq!(telemetry.format, LogFormat::Compact);
        assert_eq!(telemetry.log_level, Level::DEBUG);
    }

    #[test]
    fn log_module_flags_reach_filter() {
        let cli = Cli::try_parse_from([
            "ember-relay",
            "--log-level",
            "warn",
            "--log-module",
            "ember_server=debug",
            "--log-module",
            "tower_http=error",
        ])
        .unwrap();
        assert_eq!(
            cli.telemetry().filter_directives(),
            "warn,ember_server=debug,tower_http=error"
        );
    }

    #[test]
    fn rejects_malformed_log_module() {
        assert!(Cli::try_parse_from(["ember-relay", "--log-module", "ember_server"]).is_err());
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["ember-relay", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(Cli::try_parse_from(["ember-relay", "--port", "70000"]).is_err());
    }
}
