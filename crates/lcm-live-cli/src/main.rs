use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use lcm_live_core::config::{Config, LoggingConfig};
use lcm_live_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "lcm-live",
    about = "Real-time image-to-image streaming server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Port to listen on (default: 7860)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,

        /// Maximum concurrent sessions (default: 4)
        #[arg(long)]
        max_sessions: Option<usize>,

        /// Session timeout in seconds, 0 disables
        #[arg(long)]
        timeout: Option<f64>,

        /// Serve the browser client from this directory
        #[arg(long)]
        static_dir: Option<String>,
    },

    /// Query a running server
    Status {
        /// Server base URL (default: http://127.0.0.1:<port>)
        #[arg(long)]
        url: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let mut directives = vec![level];
    if let Some(l) = logging {
        directives.extend(l.filters.iter().cloned());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));

    let writer = match logging.map(|l| l.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match logging.map(|l| l.format.as_str()) {
        Some("json") => builder.json().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_dir);

    let mut config = Config::load(&config_path)?;

    init_logging(cli.verbose, config.logging.as_ref());
    config.apply_env_overrides();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            max_sessions,
            timeout,
            static_dir,
        } => {
            if port.is_some() || bind.is_some() || static_dir.is_some() {
                let gateway = config.gateway.get_or_insert_with(Default::default);
                if let Some(port) = port {
                    gateway.port = port;
                }
                if bind.is_some() {
                    gateway.bind = bind;
                }
                if static_dir.is_some() {
                    gateway.static_dir = static_dir;
                }
            }
            if max_sessions.is_some() || timeout.is_some() {
                let sessions = config.sessions.get_or_insert_with(Default::default);
                if let Some(max_sessions) = max_sessions {
                    sessions.max_sessions = max_sessions;
                }
                if let Some(timeout) = timeout {
                    sessions.timeout_secs = timeout;
                }
            }

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("{error}");
                }
                anyhow::bail!("Invalid configuration ({} errors)", errors.len());
            }

            let port = config.gateway_port();
            tracing::info!(
                config = %config_path.display(),
                max_sessions = config.max_sessions(),
                timeout = ?config.session_timeout(),
                safety_checker = config.safety_checker(),
                "Starting lcm-live on port {port}"
            );

            let state = GatewayState::from_config(config)?;
            #[cfg(feature = "metrics")]
            let state = state.with_metrics(lcm_live_gateway::metrics::install_prometheus_recorder()?);

            lcm_live_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Status { url } => {
            let base = url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.gateway_port()));
            let base = base.trim_end_matches('/');
            println!("lcm-live v{}", env!("CARGO_PKG_VERSION"));
            println!("Server: {base}");

            let health = match reqwest::get(format!("{base}/health")).await {
                Ok(resp) => resp.error_for_status()?.json::<serde_json::Value>().await?,
                Err(e) => {
                    println!("Status: not running ({e})");
                    return Ok(());
                }
            };
            let queue: serde_json::Value = reqwest::get(format!("{base}/queue_size"))
                .await?
                .error_for_status()?
                .json()
                .await?;

            println!("Status: {}", health["status"].as_str().unwrap_or("unknown"));
            println!("Version: {}", health["version"].as_str().unwrap_or("unknown"));
            println!(
                "Sessions: {} / {}",
                queue["queue_size"],
                health["capacity"]
            );
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "lcm-live",
            "serve",
            "--port",
            "9000",
            "--max-sessions",
            "2",
            "--timeout",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                port,
                max_sessions,
                timeout,
                ..
            } => {
                assert_eq!(port, Some(9000));
                assert_eq!(max_sessions, Some(2));
                assert_eq!(timeout, Some(30.0));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["lcm-live", "config", "show", "--verbose", "-c", "/tmp/x.json"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("/tmp/x.json"));
        assert!(matches!(cli.command, Commands::Config { action: ConfigAction::Show }));
    }
}
