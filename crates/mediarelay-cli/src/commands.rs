use std::sync::Arc;

use anyhow::{Context, Result};
use mediarelay_platform::{ConversationRef, GatewayClient, PlatformClient};
use mediarelay_runtime::{
    JobKind, ProgressSink, RelayCoordinator, RelayStatus, StatusMessageSink, TracingProgressSink,
};
use mediarelay_store::{RecordStore, SqliteRecordStore};
use tracing::warn;

use crate::cli_args::{Cli, Command};
use crate::server::{run_dispatch_server, DispatchState};

/// Builds the progress sink for one job: a live status message when a status
/// conversation is configured, log lines otherwise.
#[derive(Clone)]
pub(crate) struct SinkFactory {
    client: Arc<dyn PlatformClient>,
    status_chat: Option<ConversationRef>,
}

impl SinkFactory {
    pub(crate) fn new(client: Arc<dyn PlatformClient>, status_chat: Option<ConversationRef>) -> Self {
        Self {
            client,
            status_chat,
        }
    }

    pub(crate) fn build(&self, kind: JobKind) -> Arc<dyn ProgressSink> {
        match &self.status_chat {
            Some(chat) => Arc::new(StatusMessageSink::new(
                Arc::clone(&self.client),
                chat.clone(),
            )),
            None => Arc::new(TracingProgressSink::new(kind.as_str())),
        }
    }
}

fn parse_conversation(raw: &str, what: &str) -> Result<ConversationRef> {
    ConversationRef::parse(raw).with_context(|| format!("invalid {what} '{raw}'"))
}

fn open_store(cli: &Cli) -> Result<Arc<dyn RecordStore>> {
    let store = SqliteRecordStore::new(&cli.database)
        .with_context(|| format!("failed to open record store {}", cli.database.display()))?;
    Ok(Arc::new(store))
}

fn build_client(cli: &Cli) -> Result<Arc<dyn PlatformClient>> {
    let client =
        GatewayClient::new(cli.gateway_config()?).context("failed to build gateway client")?;
    Ok(Arc::new(client))
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let store = open_store(&cli)?;

    if matches!(cli.command, Command::Status) && cli.bot_token.is_none() {
        let total_records = store.count().await.context("failed to count records")?;
        let status = RelayStatus {
            logged_in: false,
            account: None,
            total_records,
            indexing_active: false,
            replay_active: false,
        };
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let client = build_client(&cli)?;
    let coordinator = RelayCoordinator::new(
        Arc::clone(&client),
        Arc::clone(&store),
        cli.coordinator_config(),
    );
    let sinks = SinkFactory::new(Arc::clone(&client), cli.status_conversation()?);

    match &cli.command {
        Command::Index { conversation } => {
            let conversation = parse_conversation(conversation, "conversation")?;
            coordinator
                .connect()
                .await
                .context("failed to verify the bot token")?;
            let sink = sinks.build(JobKind::Indexing);
            let report = coordinator
                .run_indexing(&conversation, sink.as_ref())
                .await
                .with_context(|| format!("indexing {conversation} failed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Replay { target } => {
            let target = parse_conversation(target, "target")?;
            coordinator
                .connect()
                .await
                .context("failed to verify the bot token")?;
            let sink = sinks.build(JobKind::Replay);
            let report = coordinator
                .run_replay(&target, sink.as_ref())
                .await
                .with_context(|| format!("replay to {target} failed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Status => {
            if let Err(error) = coordinator.connect().await {
                warn!(error = %error, "platform session probe failed");
            }
            let status = coordinator
                .status()
                .await
                .context("failed to read relay status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Serve { bind } => {
            if let Err(error) = coordinator.connect().await {
                warn!(
                    error = %error,
                    "platform session probe failed; retrying on the next job request"
                );
            }
            let state = Arc::new(DispatchState::new(coordinator, sinks));
            run_dispatch_server(bind, state).await?;
        }
    }
    Ok(())
}
