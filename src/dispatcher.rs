//! Command dispatcher.
//!
//! Consumes inbound chat events, authorizes and parses them, invokes the
//! instance control / server status services, and sends formatted replies.
//!
//! Every invocation is independent: the dispatcher holds no handler-local
//! mutable state, so concurrent events are safe by construction. Shared state
//! lives inside the status caches, which synchronize per resource key.

use crate::error::Result;
use crate::instance::{InstanceControl, InstanceStatus};
use crate::server::{ServerStatus, ServerStatusSource};
use crate::utils::format;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

/// An inbound chat event, reduced to what authorization and parsing need.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub author_id: String,
    pub channel_id: String,
    pub content: String,
}

/// A recognized control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Unknown,
}

impl Command {
    /// Match a mention-stripped token case-sensitively.
    fn parse(token: &str) -> Self {
        match token {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "status" => Self::Status,
            _ => Self::Unknown,
        }
    }
}

/// Outbound send capability of the chat transport.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<()>;
}

/// Top-level command handler.
pub struct Dispatcher {
    instance: Arc<dyn InstanceControl>,
    server: Arc<dyn ServerStatusSource>,
    channel_id: String,
    bot_id: String,
}

impl Dispatcher {
    pub fn new(
        instance: Arc<dyn InstanceControl>,
        server: Arc<dyn ServerStatusSource>,
        channel_id: String,
        bot_id: String,
    ) -> Self {
        Self {
            instance,
            server,
            channel_id,
            bot_id,
        }
    }

    /// Handle one inbound event.
    ///
    /// Ineligible events (wrong channel, self-authored, no leading mention of
    /// the bot, empty remainder) are ignored without a reply. Errors from
    /// command handling are reported to the requesting user and logged; they
    /// never propagate out of the dispatcher.
    pub async fn handle(&self, event: &ChatEvent, outbound: &dyn Outbound) {
        if event.channel_id != self.channel_id || event.author_id == self.bot_id {
            return;
        }

        let Some(token) = self.strip_mention(&event.content) else {
            return;
        };
        if token.is_empty() {
            return;
        }

        match Command::parse(token) {
            Command::Start => self.handle_start(event, outbound).await,
            Command::Stop => self.handle_stop(event, outbound).await,
            Command::Status => self.handle_status(event, outbound).await,
            Command::Unknown => self.reply(outbound, &event.author_id, format::HELP_TEXT).await,
        }
    }

    /// Strip a leading mention of the bot, accepting both the plain and the
    /// nickname encodings. Returns `None` when the message does not address
    /// the bot.
    fn strip_mention<'a>(&self, content: &'a str) -> Option<&'a str> {
        let content = content.trim();
        let plain = format!("<@{}>", self.bot_id);
        let nickname = format!("<@!{}>", self.bot_id);

        if let Some(rest) = content.strip_prefix(&plain) {
            Some(rest.trim())
        } else {
            content.strip_prefix(&nickname).map(str::trim)
        }
    }

    async fn handle_start(&self, event: &ChatEvent, outbound: &dyn Outbound) {
        if let Err(e) = self.instance.start().await {
            error!("failed to start instance: {}", e);
            self.reply(
                outbound,
                &event.author_id,
                &format::failure_text("Failed to Start Instance", &e),
            )
            .await;
        }
        // The acknowledgement is sent even when the call above already
        // failed; see DESIGN.md on this dual-message behavior.
        self.reply(outbound, &event.author_id, "```Starting Instance...```")
            .await;
    }

    async fn handle_stop(&self, event: &ChatEvent, outbound: &dyn Outbound) {
        if let Err(e) = self.instance.stop().await {
            error!("failed to stop instance: {}", e);
            self.reply(
                outbound,
                &event.author_id,
                &format::failure_text("Failed to Stop Instance", &e),
            )
            .await;
        }
        self.reply(outbound, &event.author_id, "```Stopping Instance...```")
            .await;
    }

    /// Answer a status request from both caches, degrading per side: a side
    /// that fails or comes back stale gets its failure reported, and the
    /// combined reply is still sent with whatever data is available.
    async fn handle_status(&self, event: &ChatEvent, outbound: &dyn Outbound) {
        let instance_status = match self.instance.cached_status().await {
            Ok(cached) => {
                if let Some(e) = &cached.stale_error {
                    error!("instance status is stale: {}", e);
                    self.reply(
                        outbound,
                        &event.author_id,
                        &format::failure_text("Failed to Get Instance Status", e),
                    )
                    .await;
                }
                cached.value
            }
            Err(e) => {
                error!("failed to get instance status: {}", e);
                self.reply(
                    outbound,
                    &event.author_id,
                    &format::failure_text("Failed to Get Instance Status", &e),
                )
                .await;
                InstanceStatus::unknown()
            }
        };

        let server_status = match self.server.cached_status().await {
            Ok(cached) => {
                if let Some(e) = &cached.stale_error {
                    error!("server status is stale: {}", e);
                    self.reply(
                        outbound,
                        &event.author_id,
                        &format::failure_text("Failed to Get Server Status", e),
                    )
                    .await;
                }
                cached.value
            }
            Err(e) => {
                error!("failed to get server status: {}", e);
                self.reply(
                    outbound,
                    &event.author_id,
                    &format::failure_text("Failed to Get Server Status", &e),
                )
                .await;
                ServerStatus::offline()
            }
        };

        let text = format::instance_status_text(&instance_status)
            + &format::server_status_text(&server_status);
        self.reply(outbound, &event.author_id, &text).await;
    }

    /// Send a reply to the control channel, attributed to the requesting
    /// author. Send failures are best-effort: logged and swallowed.
    async fn reply(&self, outbound: &dyn Outbound, author_id: &str, body: &str) {
        let text = format!("<@!{}>\n{}", author_id, body);
        if let Err(e) = outbound.send(&self.channel_id, &text).await {
            warn!("failed to send reply: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cached;
    use crate::error::Error;
    use crate::instance::InstanceStatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const CHANNEL: &str = "111";
    const BOT: &str = "222";
    const AUTHOR: &str = "333";

    struct RecordingOutbound {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingOutbound {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct MockInstance {
        start_result: Mutex<Result<()>>,
        status_result: Mutex<Result<Cached<InstanceStatus>>>,
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        status_calls: AtomicUsize,
    }

    impl MockInstance {
        fn healthy() -> Arc<Self> {
            Arc::new(Self {
                start_result: Mutex::new(Ok(())),
                status_result: Mutex::new(Ok(Cached {
                    value: InstanceStatus::new("srv1", InstanceStatusCode::Running),
                    stale_error: None,
                })),
                start_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
                + self.stop_calls.load(Ordering::SeqCst)
                + self.status_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InstanceControl for MockInstance {
        async fn start(&self) -> Result<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start_result.lock().unwrap().clone()
        }

        async fn stop(&self) -> Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cached_status(&self) -> Result<Cached<InstanceStatus>> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.status_result.lock().unwrap().clone()
        }
    }

    struct MockServer {
        status_result: Mutex<Result<Cached<ServerStatus>>>,
    }

    impl MockServer {
        fn online() -> Arc<Self> {
            Arc::new(Self {
                status_result: Mutex::new(Ok(Cached {
                    value: ServerStatus::online("Factorio", 3, 10, "default"),
                    stale_error: None,
                })),
            })
        }
    }

    #[async_trait]
    impl ServerStatusSource for MockServer {
        async fn cached_status(&self) -> Result<Cached<ServerStatus>> {
            self.status_result.lock().unwrap().clone()
        }
    }

    fn dispatcher(instance: Arc<MockInstance>, server: Arc<MockServer>) -> Dispatcher {
        Dispatcher::new(instance, server, CHANNEL.to_string(), BOT.to_string())
    }

    fn event(content: &str) -> ChatEvent {
        ChatEvent {
            author_id: AUTHOR.to_string(),
            channel_id: CHANNEL.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_message_without_mention_is_ignored() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("start"), &outbound).await;

        assert!(outbound.messages().is_empty());
        assert_eq!(instance.calls(), 0);
    }

    #[tokio::test]
    async fn test_message_in_other_channel_is_ignored() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        let mut ev = event("<@222> start");
        ev.channel_id = "999".to_string();
        d.handle(&ev, &outbound).await;

        assert!(outbound.messages().is_empty());
        assert_eq!(instance.calls(), 0);
    }

    #[tokio::test]
    async fn test_message_from_bot_itself_is_ignored() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        let mut ev = event("<@222> start");
        ev.author_id = BOT.to_string();
        d.handle(&ev, &outbound).await;

        assert!(outbound.messages().is_empty());
        assert_eq!(instance.calls(), 0);
    }

    #[tokio::test]
    async fn test_bare_mention_is_ignored() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222>   "), &outbound).await;

        assert!(outbound.messages().is_empty());
        assert_eq!(instance.calls(), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_command_gets_help_text() {
        let d = dispatcher(MockInstance::healthy(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> restart"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("start:  Start Instance"));
    }

    #[tokio::test]
    async fn test_commands_are_case_sensitive() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> Start"), &outbound).await;

        assert_eq!(instance.start_calls.load(Ordering::SeqCst), 0);
        let messages = outbound.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("start:  Start Instance"));
    }

    #[tokio::test]
    async fn test_nickname_mention_encoding_is_accepted() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@!222> start"), &outbound).await;

        assert_eq!(instance.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successful_start_sends_single_acknowledgement() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> start"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, CHANNEL);
        assert!(messages[0].1.starts_with("<@!333>\n"));
        assert!(messages[0].1.contains("Starting Instance..."));
    }

    #[tokio::test]
    async fn test_failed_start_sends_failure_block_and_acknowledgement() {
        let instance = MockInstance::healthy();
        *instance.start_result.lock().unwrap() =
            Err(Error::Timeout("start call exceeded 10s".to_string()));
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> start"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].1.contains("Failed to Start Instance"));
        assert!(messages[0].1.contains("start call exceeded 10s"));
        assert!(messages[1].1.contains("Starting Instance..."));
    }

    #[tokio::test]
    async fn test_stop_sends_acknowledgement() {
        let instance = MockInstance::healthy();
        let d = dispatcher(instance.clone(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> stop"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Stopping Instance..."));
        assert_eq!(instance.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_combines_instance_and_server_blocks() {
        let d = dispatcher(MockInstance::healthy(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> status"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 1);
        let text = &messages[0].1;
        assert!(text.starts_with("<@!333>\n"));
        assert!(text.contains("srv1"));
        assert!(text.contains("RUNNING"));
        assert!(text.contains("Factorio"));
        assert!(text.contains("3/10"));
        assert!(text.contains("default"));
    }

    #[tokio::test]
    async fn test_status_degrades_per_side_on_error() {
        let instance = MockInstance::healthy();
        *instance.status_result.lock().unwrap() =
            Err(Error::Upstream("status unavailable".to_string()));
        let d = dispatcher(instance, MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> status"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].1.contains("Failed to Get Instance Status"));
        assert!(messages[0].1.contains("status unavailable"));
        // The combined reply still carries the healthy side.
        assert!(messages[1].1.contains("UNKNOWN"));
        assert!(messages[1].1.contains("Factorio"));
    }

    #[tokio::test]
    async fn test_status_reports_staleness_but_presents_the_value() {
        let instance = MockInstance::healthy();
        *instance.status_result.lock().unwrap() = Ok(Cached {
            value: InstanceStatus::new("srv1", InstanceStatusCode::Running),
            stale_error: Some(Error::Upstream("refresh failed".to_string())),
        });
        let d = dispatcher(instance, MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> status"), &outbound).await;

        let messages = outbound.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].1.contains("Failed to Get Instance Status"));
        assert!(messages[1].1.contains("srv1"));
        assert!(messages[1].1.contains("RUNNING"));
    }

    #[tokio::test]
    async fn test_replies_are_attributed_to_the_author() {
        let d = dispatcher(MockInstance::healthy(), MockServer::online());
        let outbound = RecordingOutbound::new();

        d.handle(&event("<@222> status"), &outbound).await;

        for (_, text) in outbound.messages() {
            assert!(text.starts_with(&format!("<@!{}>\n", AUTHOR)));
        }
    }
}
