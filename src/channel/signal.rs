//! Signal channel: poll-based JSON-RPC client over the local daemon's
//! Unix domain socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{info, warn};

use super::{Channel, OfflineQueue, OnChatMetadata, OnMessage};
use crate::config::SignalConfig;
use crate::models::chat_id::{ChatId, Transport};
use crate::models::message::{ChatMetadata, Message};
use crate::{AppError, Result};

/// Signal channel adapter. `receive` is polled on a fixed interval; an
/// `AtomicBool` in-flight guard coalesces overlapping polls instead of
/// queuing them.
pub struct SignalChannel {
    config: SignalConfig,
    connected: AtomicBool,
    in_flight: AtomicBool,
    offline: OfflineQueue,
    on_message: Mutex<Option<OnMessage>>,
    on_chat_metadata: Mutex<Option<OnChatMetadata>>,
}

impl SignalChannel {
    /// Build the Signal channel adapter. Does not connect yet.
    #[must_use]
    pub fn new(config: SignalConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            connected: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            offline: OfflineQueue::new(),
            on_message: Mutex::new(None),
            on_chat_metadata: Mutex::new(None),
        })
    }

    /// Spawn the poll loop. Like Slack's socket-mode registration, this
    /// needs an owned `Arc<Self>` the `Channel::connect(&self)` signature
    /// cannot provide.
    pub fn spawn_poll_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(this.config.poll_seconds));
            loop {
                ticker.tick().await;
                if this.in_flight.swap(true, Ordering::SeqCst) {
                    continue;
                }
                if let Err(err) = this.poll_once().await {
                    warn!(%err, "signal poll failed");
                }
                this.in_flight.store(false, Ordering::SeqCst);
            }
        });
    }

    async fn poll_once(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.config.socket_path)
            .await
            .map_err(|err| AppError::Transport(format!("signal socket connect: {err}")))?;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(1_048_576));

        let request = json!({
            "jsonrpc": "2.0",
            "id": "dispatcher-receive",
            "method": "receive",
            "params": { "account": self.config.account_number },
        });
        framed
            .send(request.to_string())
            .await
            .map_err(|err| AppError::Transport(format!("signal send: {err}")))?;

        #[allow(clippy::unwrap_used)]
        while let Some(line) = framed.next().await {
            let line = line.map_err(|err| AppError::Transport(format!("signal read: {err}")))?;
            if let Some((message, metadata)) = self.parse_envelope(&line) {
                if let Some(callback) = self.on_chat_metadata.lock().unwrap().as_ref() {
                    callback(metadata);
                }
                if let Some(callback) = self.on_message.lock().unwrap().as_ref() {
                    callback(message);
                }
            }
        }

        Ok(())
    }

    fn parse_envelope(&self, line: &str) -> Option<(Message, ChatMetadata)> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let envelope = value.get("params")?.get("envelope")?;
        let source = envelope.get("source")?.as_str()?;

        if source == self.config.account_number {
            return None; // self-echo
        }

        let (chat_id_raw, body, is_group, group_name) = if let Some(data) = envelope.get("dataMessage") {
            let body = data.get("message")?.as_str()?.to_owned();
            if let Some(group) = data.get("groupInfo").and_then(|g| g.get("groupId")) {
                let name = data
                    .get("groupInfo")
                    .and_then(|g| g.get("groupName"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
                (format!("sig:group:{}", group.as_str()?), body, true, name)
            } else {
                (format!("sig:{source}"), body, false, None)
            }
        } else {
            return None; // typing indicator, receipt, etc. — not a message subtype
        };

        let chat_id = ChatId::parse(&chat_id_raw).ok()?;
        let timestamp_ms = envelope.get("timestamp").and_then(serde_json::Value::as_i64);
        let timestamp = timestamp_ms
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        let id = format!("{source}:{}", timestamp_ms.unwrap_or_else(|| timestamp.timestamp_millis()));

        let sender_name = envelope
            .get("sourceName")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);

        let metadata = ChatMetadata {
            chat_id: chat_id.clone(),
            observed_at: timestamp,
            display_name: group_name.or(sender_name),
            transport_tag: "signal",
            is_group,
        };

        Some((
            Message {
                id,
                chat_id,
                sender_id: source.to_owned(),
                body,
                received_at: timestamp,
                is_self_echo: false,
            },
            metadata,
        ))
    }

    /// Issue the actual JSON-RPC `send` call. Kept separate from
    /// `Channel::send` so the latter can catch every failure mode here
    /// (socket connect, write, request framing) and re-enqueue instead of
    /// propagating it up through the turn that triggered the send.
    async fn try_send(&self, chat_id: &ChatId, body: &str) -> Result<()> {
        let recipient = chat_id
            .as_str()
            .strip_prefix("sig:group:")
            .map(|g| ("groupId", g.to_owned()))
            .or_else(|| {
                chat_id
                    .as_str()
                    .strip_prefix("sig:")
                    .map(|n| ("recipient", n.to_owned()))
            })
            .ok_or_else(|| AppError::ToolValidation(format!("not a signal chat id: {chat_id}")))?;

        let stream = UnixStream::connect(&self.config.socket_path)
            .await
            .map_err(|err| AppError::Transport(format!("signal socket connect: {err}")))?;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(1_048_576));

        let mut params = serde_json::Map::new();
        params.insert("account".into(), json!(self.config.account_number));
        params.insert("message".into(), json!(body));
        params.insert(recipient.0.into(), json!(recipient.1));

        let request = json!({
            "jsonrpc": "2.0",
            "id": "dispatcher-send",
            "method": "send",
            "params": params,
        });

        framed
            .send(request.to_string())
            .await
            .map_err(|err| AppError::Transport(format!("signal send: {err}")))?;

        info!(%chat_id, "sent signal message");
        Ok(())
    }
}

#[async_trait]
impl Channel for SignalChannel {
    fn name(&self) -> &str {
        "signal"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        // `send` never propagates a transport failure (it re-enqueues instead),
        // so a mid-drain daemon outage just leaves the remaining pairs queued
        // for the next reconnect rather than aborting the FIFO drain.
        for (chat_id, body) in self.offline.drain() {
            self.send(&chat_id, &body).await?;
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
        Transport::Signal
    }

    async fn send(&self, chat_id: &ChatId, body: &str) -> Result<()> {
        if !self.is_connected() {
            self.offline.push(chat_id.clone(), body.to_owned());
            return Ok(());
        }

        if let Err(err) = self.try_send(chat_id, body).await {
            warn!(%chat_id, %err, "signal send failed, re-enqueuing for next reconnect");
            self.offline.push(chat_id.clone(), body.to_owned());
        }
        Ok(())
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
