//! Espera mobile service entry point.
//!
//! Runs the mobile connection service headless: announces the desktop on
//! every local subnet, accepts mobile clients on the configured port, and
//! logs the connected-client count until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! espera-mobile [OPTIONS]
//!
//! Options:
//!   --config <PATH>       Config file [default: platform config dir]
//!   --port <PORT>         Listening/discovery port (49152-65535)
//!   --no-discovery        Do not send discovery datagrams
//!   --log-level <LEVEL>   Log level when RUST_LOG is unset
//!   --save-config         Write the effective settings to the config file and exit
//! ```
//!
//! Precedence for every setting: command line, then environment variable,
//! then config file, then built-in default.  `RUST_LOG` overrides the log
//! level entirely.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()           -- mobile.toml or defaults
//!  └─ MobileApi::new()        -- validates the port
//!       ├─ start_accepting()  -- TCP accept loop (Tokio task)
//!       └─ start_broadcast()  -- UDP discovery sweep (Tokio task)
//!  └─ ctrl_c → dispose()
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use espera_mobile::infrastructure::network::session::TcpSessionFactory;
use espera_mobile::infrastructure::storage::config::{self, AppConfig};
use espera_mobile::MobileApi;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Espera mobile connection service.
#[derive(Debug, Parser)]
#[command(
    name = "espera-mobile",
    about = "Makes Espera discoverable and reachable by mobile companion apps",
    version
)]
struct Cli {
    /// Path to the configuration file.
    ///
    /// Defaults to `mobile.toml` in the platform config directory.
    #[arg(long, value_name = "PATH", env = "ESPERA_MOBILE_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on; discovery datagrams target the same port.
    ///
    /// Must lie in the dynamic range 49152-65535.
    #[arg(long, env = "ESPERA_MOBILE_PORT")]
    port: Option<u32>,

    /// Disable the discovery sweep; clients must be given the address manually.
    #[arg(long)]
    no_discovery: bool,

    /// Log level used when `RUST_LOG` is unset (error, warn, info, debug, trace).
    #[arg(long, env = "ESPERA_LOG")]
    log_level: Option<String>,

    /// Write the effective settings (file plus overrides) to the config file
    /// and exit without starting the service.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Loads the config file named by `--config` or the platform default.
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => match config::load_config() {
                Err(config::ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
                other => other.context("failed to load config"),
            },
        }
    }

    /// Writes `cfg` to the file named by `--config` or the platform default,
    /// returning the path written.
    fn save_config(&self, cfg: &AppConfig) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => {
                config::save_config_to(path, cfg)
                    .with_context(|| format!("failed to write config to {}", path.display()))?;
                Ok(path.clone())
            }
            None => {
                config::save_config(cfg).context("failed to write config")?;
                config::config_file_path().context("failed to locate config file")
            }
        }
    }

    /// Applies command-line overrides on top of the loaded config.
    fn apply(&self, mut cfg: AppConfig) -> AppConfig {
        if let Some(port) = self.port {
            cfg.mobile.port = port;
        }
        if self.no_discovery {
            cfg.mobile.discovery = false;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        cfg
    }
}

/// The headless service has no media library of its own; sessions receive
/// this empty handle.
#[derive(Debug, Default)]
struct HeadlessLibrary;

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = cli.apply(cli.load_config()?);

    // Initialise structured logging.  `RUST_LOG` wins over the config level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .init();

    if cli.save_config {
        let path = cli.save_config(&cfg)?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    info!("Espera mobile service starting");

    let api = Arc::new(
        MobileApi::new(
            cfg.mobile.to_api_config(),
            Arc::new(HeadlessLibrary),
            Arc::new(TcpSessionFactory),
        )
        .context("invalid mobile service configuration")?,
    );

    let addr = api
        .start_accepting()
        .await
        .context("failed to start accepting mobile clients")?;
    info!("accepting mobile clients on {addr}");

    if cfg.mobile.discovery {
        if let Err(e) = api.start_broadcast() {
            warn!("discovery disabled: {e}");
        }
    } else {
        info!("discovery sweep disabled by configuration");
    }

    // ── Connected-client indicator ────────────────────────────────────────────
    let mut clients = api.connected_clients();
    let indicator = Arc::clone(&api);
    tokio::spawn(async move {
        while clients.changed().await.is_ok() {
            let count = *clients.borrow_and_update();
            info!("{count} mobile client(s) connected");
            debug!("connected sessions: {:?}", indicator.connected_client_ids());
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    api.dispose();
    api.join().await;
    info!(
        "Espera mobile service stopped after {} connection(s)",
        api.accepted_connections()
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
