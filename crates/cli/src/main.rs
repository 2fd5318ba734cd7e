mod channel_commands;
mod plugin_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    iitcm_config::ManagerConfig,
    iitcm_core::{FileStore, Host, Manager, ReqwestClient},
    tracing::{debug, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "iitcm", about = "IITC plugin manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./iitcm.toml and the user config dir).
    #[arg(long, global = true, env = "IITCM_CONFIG")]
    config: Option<PathBuf>,

    /// Storage file (overrides `storage.path` from the config).
    #[arg(long, global = true, env = "IITCM_STORAGE")]
    storage: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the current channel and external user scripts. Keeps
    /// running on the configured intervals in daemon mode.
    Run {
        /// Keep checking on the configured intervals until interrupted.
        #[arg(long, conflicts_with = "once")]
        daemon: bool,
        /// Check once and exit.
        #[arg(long)]
        once: bool,
    },
    /// Check for updates now.
    Check {
        /// Re-download the catalog even if it did not change.
        #[arg(long)]
        force: bool,
        /// Check user scripts with an update URL instead of the catalog.
        #[arg(long)]
        external: bool,
    },
    /// Plugin management.
    Plugins {
        #[command(subcommand)]
        action: plugin_commands::PluginCommand,
    },
    /// Update channel management.
    Channel {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// Print the core script followed by every enabled plugin.
    Inject,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so that command output stays pipeable.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ManagerConfig> {
    let mut config = match &cli.config {
        Some(path) => iitcm_config::load_config(path)?,
        None => iitcm_config::discover_and_load(),
    };
    if let Some(path) = &cli.storage {
        config.storage.path = Some(path.clone());
    }
    Ok(config)
}

/// Host callbacks for a terminal: messages and events become log lines.
fn terminal_host() -> Host {
    Host::new()
        .on_message(|key, args| warn!(key, ?args, "manager message"))
        .on_plugin_event(|event| {
            let uids: Vec<&str> = event.uids().collect();
            info!(event = ?event.event, ?uids, "plugin event");
        })
        .on_progressbar(|visible| debug!(visible, "request in progress"))
}

fn build_manager(config: ManagerConfig, host: Host) -> Arc<Manager> {
    let path = config
        .storage
        .path
        .clone()
        .unwrap_or_else(FileStore::default_path);
    debug!(path = %path.display(), "using storage");
    let manager = Manager::new(
        config,
        Arc::new(FileStore::new(path)),
        Arc::new(ReqwestClient::new()),
        host,
    );
    // Commands other than `run` exit when done and never arm timers.
    manager.set_session_daemon(Some(false));
    manager
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "iitcm starting");

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run { daemon, once } => {
            let manager = build_manager(config, terminal_host());
            // Flags only apply to this invocation; the stored mode is untouched.
            manager.set_session_daemon(if daemon {
                Some(true)
            } else if once {
                Some(false)
            } else {
                None
            });
            manager.run().await?;
            if manager.is_daemon() {
                info!(channel = %manager.channel(), "waiting for scheduled checks, ctrl-c to stop");
                tokio::signal::ctrl_c().await?;
                manager.stop();
            }
            Ok(())
        },
        Commands::Check { force, external } => {
            let manager = build_manager(config, terminal_host());
            if external {
                manager.check_external_updates(force).await?;
            } else {
                manager.check_updates(force).await?;
            }
            Ok(())
        },
        Commands::Plugins { action } => {
            let manager = build_manager(config, terminal_host());
            plugin_commands::handle_plugins(&manager, action).await
        },
        Commands::Channel { action } => {
            let manager = build_manager(config, terminal_host());
            channel_commands::handle_channel(&manager, action).await
        },
        Commands::Inject => {
            let host = terminal_host().on_inject_user_script(|code| println!("{code}"));
            let manager = build_manager(config, host);
            manager.inject().await?;
            Ok(())
        },
    }
}
