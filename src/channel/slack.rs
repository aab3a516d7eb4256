//! Slack channel: Socket Mode inbound push, buffered outbound queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackChannelId, SlackClient, SlackClientEventsListenerEnvironment,
    SlackClientHyperHttpsConnector, SlackClientSocketModeConfig, SlackClientSocketModeListener,
    SlackMessageContent, SlackPushEventCallback, SlackPushEventCallbackBody,
    SlackSocketModeListenerCallbacks,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{Channel, OfflineQueue, OnChatMetadata, OnMessage};
use crate::config::SlackConfig;
use crate::models::chat_id::{ChatId, Transport};
use crate::models::message::{ChatMetadata, Message};
use crate::{AppError, Result};

const QUEUE_CAPACITY: usize = 256;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Slack channel adapter: a Socket Mode listener feeding normalized
/// messages to the dispatcher, and a rate-limited `chat.postMessage`
/// sender queue.
pub struct SlackChannel {
    config: SlackConfig,
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    bot_user_id: Mutex<Option<String>>,
    connected: AtomicBool,
    offline: OfflineQueue,
    outbound_tx: mpsc::Sender<(SlackChannelId, String)>,
    on_message: Mutex<Option<OnMessage>>,
    on_chat_metadata: Mutex<Option<OnChatMetadata>>,
}

impl SlackChannel {
    /// Build the Slack channel adapter. Does not connect yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTPS connector cannot be built.
    pub fn new(config: SlackConfig) -> Result<Arc<Self>> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Transport(format!("slack connector init: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let channel = Arc::new(Self {
            config,
            client,
            bot_token,
            bot_user_id: Mutex::new(None),
            connected: AtomicBool::new(false),
            offline: OfflineQueue::new(),
            outbound_tx,
            on_message: Mutex::new(None),
            on_chat_metadata: Mutex::new(None),
        });

        channel.clone().spawn_send_worker(outbound_rx);
        Ok(channel)
    }

    #[allow(clippy::unwrap_used)]
    fn spawn_send_worker(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<(SlackChannelId, String)>,
    ) {
        tokio::spawn(async move {
            let session = self.client.open_session(&self.bot_token);
            while let Some((channel, text)) = rx.recv().await {
                let request = SlackApiChatPostMessageRequest {
                    channel,
                    content: SlackMessageContent {
                        text: Some(text),
                        blocks: None,
                        attachments: None,
                        upload: None,
                        files: None,
                        reactions: None,
                        metadata: None,
                    },
                    as_user: None,
                    icon_emoji: None,
                    icon_url: None,
                    link_names: Some(true),
                    parse: None,
                    thread_ts: None,
                    username: None,
                    reply_broadcast: None,
                    unfurl_links: None,
                    unfurl_media: None,
                };

                let mut backoff = INITIAL_RETRY_DELAY;
                loop {
                    match session.chat_post_message(&request).await {
                        Ok(_) => break,
                        Err(error) => {
                            let delay = match &error {
                                slack_morphism::errors::SlackClientError::RateLimitError(rate) => {
                                    rate.retry_after.unwrap_or(backoff)
                                }
                                _ => backoff,
                            };
                            warn!(?error, ?delay, "slack post failed; retrying");
                            tokio::time::sleep(delay).await;
                            backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                        }
                    }
                }
            }
            info!("slack send worker exiting");
        });
    }

    fn spawn_socket_mode(self: &Arc<Self>) {
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(self.config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: None,
        };

        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client)).with_error_handler(
                |err, _client, _state| {
                    error!(?err, "slack socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                },
            ),
        );

        let this = Arc::clone(self);
        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(
            move |event, _client, _state| {
                let this = Arc::clone(&this);
                async move {
                    this.handle_push_event(event);
                    Ok(())
                }
            },
        );

        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "slack socket mode listen failed");
                return;
            }
            listener.serve().await;
            info!("slack socket mode listener exited");
        });
    }

    #[allow(clippy::unwrap_used)]
    fn handle_push_event(&self, event: SlackPushEventCallback) {
        let SlackPushEventCallbackBody::Message(msg_event) = event.event else {
            return;
        };

        let Some(channel_id) = msg_event.origin.channel.clone() else {
            return;
        };
        let Some(sender) = msg_event.sender.user.clone() else {
            return;
        };
        let Some(content) = msg_event.content.as_ref().and_then(|c| c.text.clone()) else {
            return;
        };

        let is_self_echo = self
            .bot_user_id
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|bot_id| bot_id == sender.0);
        if is_self_echo || msg_event.subtype.is_some() {
            return;
        }

        let chat_id = match ChatId::parse(&format!("slack:{}:channel:{}", sender.0, channel_id.0))
        {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "dropping slack message with unparseable chat id");
                return;
            }
        };

        let body = strip_slack_mentions(&content);
        let observed_at = Utc::now();
        let is_group = !channel_id.0.starts_with('D');

        let message = Message {
            id: msg_event.origin.ts.0.clone(),
            chat_id: chat_id.clone(),
            sender_id: sender.0,
            body,
            received_at: observed_at,
            is_self_echo: false,
        };

        if let Some(callback) = self.on_chat_metadata.lock().unwrap().as_ref() {
            callback(ChatMetadata {
                chat_id,
                observed_at,
                display_name: None,
                transport_tag: "slack",
                is_group,
            });
        }

        if let Some(callback) = self.on_message.lock().unwrap().as_ref() {
            callback(message);
        }
    }
}

/// Strip Slack's `<@U12345>` mention syntax down to nothing, leaving the
/// surrounding text intact.
fn strip_slack_mentions(text: &str) -> String {
    let re = regex::Regex::new(r"<@[A-Z0-9]+>").unwrap_or_else(|_| {
        #[allow(clippy::unwrap_used)]
        regex::Regex::new(r"a^").unwrap()
    });
    re.replace_all(text, "").trim().to_owned()
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn connect(&self) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport(&self) -> Transport {
        Transport::Slack
    }

    async fn send(&self, chat_id: &ChatId, body: &str) -> Result<()> {
        if !self.is_connected() {
            self.offline.push(chat_id.clone(), body.to_owned());
            return Ok(());
        }

        let channel_id = extract_slack_channel(chat_id)?;
        self.outbound_tx
            .send((channel_id, body.to_owned()))
            .await
            .map_err(|err| AppError::Transport(format!("slack send queue closed: {err}")))
    }

    fn on_message(&self, callback: OnMessage) {
        #[allow(clippy::unwrap_used)]
        {
            *self.on_message.lock().unwrap() = Some(callback);
        }
    }

    fn on_chat_metadata(&self, callback: OnChatMetadata) {
        #[allow(clippy::unwrap_used)]
        {
            *self.on_chat_metadata.lock().unwrap() = Some(callback);
        }
    }
}

/// Start Socket Mode listening and flush any sends queued while offline.
/// Exposed separately from `connect` because Socket Mode registration
/// needs `Arc<Self>`, which a trait method signature taking `&self`
/// cannot provide.
pub async fn start(channel: &Arc<SlackChannel>) -> Result<()> {
    let session = channel.client.open_session(&channel.bot_token);
    let auth = session
        .auth_test()
        .await
        .map_err(|err| AppError::Transport(format!("slack auth.test failed: {err}")))?;
    #[allow(clippy::unwrap_used)]
    {
        *channel.bot_user_id.lock().unwrap() = Some(auth.user_id.0.clone());
    }
    info!(bot_user_id = %auth.user_id.0, "slack bot user id resolved");

    channel.connect().await?;
    channel.spawn_socket_mode();

    for (chat_id, body) in channel.offline.drain() {
        channel.send(&chat_id, &body).await?;
    }

    Ok(())
}

fn extract_slack_channel(chat_id: &ChatId) -> Result<SlackChannelId> {
    let raw = chat_id.as_str();
    let id = raw
        .rsplit(':')
        .next()
        .ok_or_else(|| AppError::ToolValidation(format!("malformed slack chat id: {raw}")))?;
    Ok(SlackChannelId(id.to_owned()))
}
