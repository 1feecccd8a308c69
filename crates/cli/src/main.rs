use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::channels::{ChatTransport, TelegramChannel};
use lib::config::{self, Config};
use lib::dispatch::Dispatcher;
use lib::llm::OpenAiClient;
use lib::relay::{CompletionOutcome, CompletionRelay, RelaySettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const INBOUND_QUEUE: usize = 64;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Telegram bot that relays addressed messages to a completion service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Report whether the Telegram token and completion API key are available (values are never printed).
    Check {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the bot: long-poll Telegram and answer messages addressed to it.
    Run {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Send one query through the completion relay and print the reply. Telegram is not used.
    Ask {
        /// Config file path (default: CHATRELAY_CONFIG_PATH or ~/.chatrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Query text.
        text: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatrelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bot(config).await {
                log::error!("bot failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, text }) => {
            if let Err(e) = run_ask(config, text).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn presence(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "missing"
    }
}

fn log_secret_presence(config: &Config) {
    log::info!(
        "{}: {}",
        config::TELEGRAM_TOKEN_ENV,
        presence(config::resolve_telegram_token(config).is_some())
    );
    log::info!(
        "{}: {}",
        config::COMPLETION_KEY_ENV,
        presence(config::resolve_completion_key(config).is_some())
    );
}

fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    log::info!("config: {}", path.display());
    log_secret_presence(&config);
    config::resolve_secrets(&config)?;
    println!("ok");
    Ok(())
}

fn build_relay(config: &Config, api_key: String) -> CompletionRelay<OpenAiClient> {
    let client = OpenAiClient::new(
        Some(config.completion.base_url.clone()),
        api_key,
        config.completion.model.clone(),
    );
    log::info!("completion: model {} at {}", client.model(), config.completion.base_url);
    CompletionRelay::new(client, RelaySettings::from(&config.completion))
}

async fn run_bot(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    log_secret_presence(&config);
    let secrets = config::resolve_secrets(&config)?;

    let relay = Arc::new(build_relay(&config, secrets.completion_key));
    let telegram = Arc::new(TelegramChannel::new(
        secrets.telegram_token,
        config::resolve_telegram_api_base(&config),
        config.channels.telegram.poll_timeout_secs,
        Duration::from_secs(config.channels.telegram.request_timeout_secs),
    ));
    let me = telegram.self_identity().await?;
    log::info!("telegram: bot started as @{}", me.handle());

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let poll = telegram.clone().start_inbound(inbound_tx);
    let transport: Arc<dyn ChatTransport> = telegram.clone();
    let dispatcher = Arc::new(Dispatcher::new(transport, relay, me, config.replies.clone()));
    let dispatch = tokio::spawn(dispatcher.run(inbound_rx, config.dispatch.concurrent));

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    telegram.stop();
    poll.abort();
    // Aborting the poll task drops the sender; the dispatcher finishes in-flight messages and returns.
    dispatch.await.context("dispatcher task failed")?;
    Ok(())
}

async fn run_ask(config_path: Option<PathBuf>, text: String) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let api_key = config::resolve_completion_key(&config)
        .ok_or_else(|| anyhow::anyhow!("missing required secret: {}", config::COMPLETION_KEY_ENV))?;
    let relay = build_relay(&config, api_key);
    match relay.complete(&text).await {
        CompletionOutcome::Success { text } => println!("{}", text.trim()),
        CompletionOutcome::Failure { cause } => {
            log::warn!("completion failed: {}", cause);
            println!("{}", config.replies.apology);
        }
    }
    Ok(())
}
