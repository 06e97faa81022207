use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mediarelay_platform::{ConversationRef, GatewayConfig};
use mediarelay_runtime::{CoordinatorConfig, IndexingConfig, ReplayConfig, WalkerConfig};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "mediarelay",
    about = "Index media messages from a conversation and replay them to another",
    version,
    propagate_version = true
)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Base URL of the Bot-API-compatible gateway"
    )]
    pub(crate) api_base: String,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_BOT_TOKEN",
        hide_env_values = true,
        help = "Bot token used for every gateway call"
    )]
    pub(crate) bot_token: Option<String>,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_DATABASE",
        default_value = ".mediarelay/records.sqlite",
        help = "SQLite file holding indexed records"
    )]
    pub(crate) database: PathBuf,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_STATUS_CHAT",
        allow_negative_numbers = true,
        help = "Conversation that receives the live status message; progress is only logged when unset"
    )]
    pub(crate) status_chat: Option<String>,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_WINDOW_SIZE",
        default_value_t = 100,
        value_parser = parse_positive_usize,
        help = "Message ids fetched per traversal window"
    )]
    pub(crate) window_size: usize,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_INDEX_DELAY_MS",
        default_value_t = 3_000,
        help = "Pause after every indexed window"
    )]
    pub(crate) index_delay_ms: u64,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_REPLAY_DELAY_MS",
        default_value_t = 2_000,
        help = "Pause after every replayed record"
    )]
    pub(crate) replay_delay_ms: u64,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_WINDOW_ERROR_BACKOFF_MS",
        default_value_t = 5_000,
        help = "Pause after a window is abandoned because of a fetch error"
    )]
    pub(crate) window_error_backoff_ms: u64,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_RATE_LIMIT_CEILING_MS",
        default_value_t = 3_600_000,
        value_parser = parse_positive_u64,
        help = "Total rate-limit wait tolerated per window before indexing fails as stalled"
    )]
    pub(crate) rate_limit_ceiling_ms: u64,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for a single gateway request"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long,
        global = true,
        env = "MEDIARELAY_MAX_RETRIES",
        default_value_t = 3,
        help = "Retries for transport failures and 5xx responses"
    )]
    pub(crate) max_retries: usize,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Index every document and video of a conversation
    Index {
        /// Numeric conversation id or @handle
        #[arg(allow_negative_numbers = true)]
        conversation: String,
    },
    /// Re-send every indexed file to a conversation
    Replay {
        /// Numeric conversation id or @handle
        #[arg(allow_negative_numbers = true)]
        target: String,
    },
    /// Print session and store status as JSON
    Status,
    /// Run the HTTP dispatch surface
    Serve {
        #[arg(long, env = "MEDIARELAY_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

impl Cli {
    pub(crate) fn gateway_config(&self) -> Result<GatewayConfig> {
        let bot_token = self
            .bot_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .context("--bot-token (or MEDIARELAY_BOT_TOKEN) is required")?;
        Ok(GatewayConfig {
            api_base: self.api_base.clone(),
            bot_token,
            request_timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
        })
    }

    pub(crate) fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            indexing: IndexingConfig {
                walker: WalkerConfig {
                    window_size: self.window_size,
                    error_backoff: Duration::from_millis(self.window_error_backoff_ms),
                    rate_limit_ceiling: Duration::from_millis(self.rate_limit_ceiling_ms),
                },
                window_delay: Duration::from_millis(self.index_delay_ms),
            },
            replay: ReplayConfig {
                record_delay: Duration::from_millis(self.replay_delay_ms),
                ..ReplayConfig::default()
            },
        }
    }

    pub(crate) fn status_conversation(&self) -> Result<Option<ConversationRef>> {
        self.status_chat
            .as_deref()
            .map(|raw| {
                ConversationRef::parse(raw)
                    .with_context(|| format!("invalid --status-chat '{raw}'"))
            })
            .transpose()
    }
}
