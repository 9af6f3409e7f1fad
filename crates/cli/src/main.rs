mod accounts;
mod channel_commands;
mod responder;
mod session_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    clawlink_config::ClawlinkConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "clawlink", about = "clawlink: Mochat / Claw IM channel bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/clawlink/).
    #[arg(long, global = true, env = "CLAWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for cursor files and event logs (overrides config value).
    #[arg(long, global = true, env = "CLAWLINK_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled account until Ctrl-C (default when no subcommand is
    /// provided).
    Run,
    /// Validate accounts and print a redacted summary.
    Check,
    /// Send a message to a session or panel.
    Send {
        /// Target id. `panel:`, `group:` and `channel:` force a panel;
        /// `mochat:` is stripped.
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        message: String,
        /// Message id to reply to.
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },
    /// Session management through the REST API.
    Sessions {
        #[arg(long, global = true)]
        account: Option<String>,
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ClawlinkConfig> {
    let mut config = match cli.config {
        Some(ref path) => clawlink_config::load_config(path)?,
        None => {
            let (config, path) = clawlink_config::discover_and_load()?;
            if path.is_none() {
                eprintln!("No config file found; create clawlink.toml to configure accounts.");
            }
            config
        },
    };
    if let Some(ref dir) = cli.state_dir {
        config.state_dir = Some(dir.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "clawlink starting");

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Run) => channel_commands::run(&config).await,
        Some(Commands::Check) => channel_commands::check(&config),
        Some(Commands::Send {
            to,
            message,
            reply_to,
            account,
        }) => {
            channel_commands::send(
                &config,
                account.as_deref(),
                &to,
                &message,
                reply_to.as_deref(),
            )
            .await
        },
        Some(Commands::Sessions { account, action }) => {
            session_commands::handle_session(&config, account.as_deref(), action).await
        },
    }
}
