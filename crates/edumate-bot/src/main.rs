//! Edumate Bot — entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::{info, warn};

use edumate_attendance::{
    ChromiumRenderer, Coordinator, ExtractionEngine, JsonFileRegistry, SessionStore,
};
use edumate_bot::config::{BotConfig, Overrides};
use edumate_bot::transport::{Dispatcher, TelegramClient};

#[derive(Parser)]
#[command(
    name = "edumate-bot",
    about = "Telegram bot that fetches Edumate attendance and OD percentages",
    version
)]
struct Cli {
    /// Bot API token. Also reads TELEGRAM_BOT_TOKEN.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Registry file mapping chats to emails. Also reads EDUMATE_USERS_FILE.
    #[arg(long, global = true)]
    users_file: Option<String>,

    /// Directory for failure screenshots. Also reads EDUMATE_SCREENSHOT_DIR.
    #[arg(long, global = true)]
    screenshot_dir: Option<String>,

    /// Path to the Chromium binary. Also reads EDUMATE_CHROMIUM_PATH.
    #[arg(long, global = true)]
    chromium: Option<String>,

    /// Fixed portal base URL instead of per-email resolution.
    /// Also reads EDUMATE_PORTAL_URL.
    #[arg(long, global = true)]
    portal_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for messages and answer them (default).
    Serve,

    /// Check Chromium, token, registry, and screenshot directory.
    Doctor,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   edumate-bot completions bash > ~/.local/share/bash-completion/completions/edumate-bot
    ///   edumate-bot completions zsh > ~/.zfunc/_edumate-bot
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            token: self.token.clone(),
            users_file: self.users_file.clone(),
            screenshot_dir: self.screenshot_dir.clone(),
            chromium: self.chromium.clone(),
            portal_url: self.portal_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);
    let overrides = cli.overrides();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&overrides).await?,

        Commands::Doctor => {
            if !edumate_bot::doctor::run(&overrides).await? {
                std::process::exit(1);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "edumate-bot", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(overrides: &Overrides) -> anyhow::Result<()> {
    let config = BotConfig::resolve(overrides)?;
    info!("starting edumate-bot v{}", env!("CARGO_PKG_VERSION"));

    let renderer = ChromiumRenderer::new(config.chromium.clone())
        .context("Chromium is required; run `edumate-bot doctor`")?;
    info!(chrome = %renderer.chrome_path().display(), "Chromium renderer ready");

    let client = Arc::new(TelegramClient::with_api_base(&config.token, &config.api_base)?);
    let me = client.get_me().await.context("bot token check failed")?;
    info!(bot = me.username.as_deref().unwrap_or_default(), "connected to Bot API");

    let registry = Arc::new(JsonFileRegistry::new(&config.users_file));
    info!(path = %registry.path().display(), "using registry");

    let engine = Arc::new(ExtractionEngine::new(
        Arc::new(renderer),
        config.extraction_config(),
    ));
    let coordinator = Arc::new(Coordinator::new(
        client.clone(),
        registry,
        engine,
        Arc::new(SessionStore::new()),
    ));

    Dispatcher::new(client, coordinator)
        .with_poll_timeout(config.poll_timeout)
        .run(shutdown_signal())
        .await?;

    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
