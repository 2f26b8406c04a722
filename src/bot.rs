//! Discord gateway wiring.
//!
//! This module is the composition root: it loads configuration, wires the
//! control plane client, the two status services, and the dispatcher
//! together, then runs the gateway session. The gateway delivers each message
//! event as its own task, so dispatcher invocations run concurrently.

use crate::config::Config;
use crate::dispatcher::{ChatEvent, Dispatcher, Outbound};
use crate::error::{Error, Result};
use crate::gcp::{self, GcpComputeClient};
use crate::instance::InstanceService;
use crate::query::A2sClient;
use crate::server::ServerStatusService;
use async_trait::async_trait;
use serenity::all::{ChannelId, Client, Context, EventHandler, GatewayIntents, Message, Ready};
use serenity::http::Http;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Outbound sends through the Discord REST API. The HTTP client serializes
/// nothing itself; concurrent sends are safe and may interleave.
struct DiscordOutbound {
    http: Arc<Http>,
}

#[async_trait]
impl Outbound for DiscordOutbound {
    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let id: u64 = channel_id
            .parse()
            .map_err(|_| Error::Transport(format!("invalid channel id '{}'", channel_id)))?;
        if id == 0 {
            return Err(Error::Transport("channel id must be non-zero".to_string()));
        }

        ChannelId::new(id).say(&self.http, text).await?;
        Ok(())
    }
}

struct Handler {
    dispatcher: Arc<Dispatcher>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn message(&self, context: Context, message: Message) {
        let event = ChatEvent {
            author_id: message.author.id.to_string(),
            channel_id: message.channel_id.to_string(),
            content: message.content,
        };
        let outbound = DiscordOutbound {
            http: context.http.clone(),
        };
        self.dispatcher.handle(&event, &outbound).await;
    }

    async fn ready(&self, _context: Context, ready: Ready) {
        info!(user = %ready.user.name, "listening");
    }
}

/// Load configuration and credentials, build the service graph, and run the
/// gateway session until shutdown.
///
/// # Errors
///
/// Any failure here (config, credential, session) is a startup failure the
/// caller treats as fatal.
pub async fn run(config_path: &Path, credential_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let token = gcp::load_access_token(credential_path)?;

    let api = Arc::new(GcpComputeClient::new(
        config.gcp.project.clone(),
        config.gcp.zone.clone(),
        token,
    ));
    let instance = Arc::new(InstanceService::new(
        api,
        config.gcp.instance.clone(),
        config.instance_ttl(),
        config.upstream_timeout(),
    ));
    let query = Arc::new(A2sClient::new(config.upstream_timeout()));
    let server = Arc::new(ServerStatusService::new(
        query,
        config.server.address.clone(),
        config.server_ttl(),
        config.upstream_timeout(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        instance,
        server,
        config.discord.channel_id.clone(),
        config.discord.bot_id.clone(),
    ));

    let intents = GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&config.discord.token, intents)
        .event_handler(Handler { dispatcher })
        .await
        .map_err(|e| Error::Transport(format!("failed to create session: {}", e)))?;

    // On ctrl-c the shards stop taking new events; in-flight handler
    // invocations complete naturally before start() returns.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client
        .start()
        .await
        .map_err(|e| Error::Transport(format!("session ended: {}", e)))?;

    Ok(())
}
