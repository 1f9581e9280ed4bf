//! Publish/subscribe consumer.
//!
//! Subscription commands are written without waiting for their
//! acknowledgements; acknowledgements and published messages all come back
//! through the [`Subscription`] iterator in the order the server sends them.

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;

use crate::command::{self, RawCommand};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::resp::Reply;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubscriptionState: u8 {
        /// The consumer can still yield messages.
        const VALID       = 1 << 0;
        /// SUBSCRIBE was sent at least once.
        const SUBSCRIBED  = 1 << 1;
        /// PSUBSCRIBE was sent at least once.
        const PSUBSCRIBED = 1 << 2;
        /// `stop(false)` already sent the unsubscriptions.
        const STOPPING    = 1 << 3;
    }
}

/// Which subscription command an acknowledgement answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
}

impl AckKind {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "psubscribe" => Some(Self::PSubscribe),
            "punsubscribe" => Some(Self::PUnsubscribe),
            _ => None,
        }
    }
}

/// One item pushed by the server to a subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Acknowledgement of a (un)subscription. `channel` is `None` when an
    /// unsubscribe was sent with nothing subscribed.
    Ack {
        kind: AckKind,
        channel: Option<Bytes>,
        count: i64,
    },
    Message {
        channel: Bytes,
        payload: Bytes,
    },
    PMessage {
        pattern: Bytes,
        channel: Bytes,
        payload: Bytes,
    },
    Pong {
        payload: Bytes,
    },
}

impl Message {
    pub fn channel(&self) -> Option<&[u8]> {
        match self {
            Self::Ack { channel, .. } => channel.as_deref(),
            Self::Message { channel, .. } | Self::PMessage { channel, .. } => Some(channel),
            Self::Pong { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Message { payload, .. }
            | Self::PMessage { payload, .. }
            | Self::Pong { payload } => Some(payload),
            Self::Ack { .. } => None,
        }
    }
}

/// Forward-only consumer of pushed messages.
///
/// Iteration ends once the server reports that no subscriptions are left.
/// Dropping a consumer that is still valid sends UNSUBSCRIBE/PUNSUBSCRIBE
/// for whatever it subscribed to and then closes the connection, since the
/// unread acknowledgements would otherwise answer the next request. The
/// connection reopens on its next use.
pub struct Subscription<'a> {
    connection: &'a mut dyn Connection,
    state: SubscriptionState,
    position: usize,
}

impl<'a> Subscription<'a> {
    pub fn new(connection: &'a mut dyn Connection) -> Result<Self> {
        if connection.is_cluster() {
            return Err(Error::client(
                "cannot initialize a PUB/SUB consumer over clusters of connections",
            ));
        }

        Ok(Self {
            connection,
            state: SubscriptionState::VALID,
            position: 0,
        })
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state.contains(SubscriptionState::VALID)
    }

    /// Number of messages yielded so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn subscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> Result<&mut Self> {
        self.send(&command::subscribe(channels))?;
        self.state.insert(SubscriptionState::SUBSCRIBED);
        Ok(self)
    }

    pub fn psubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> Result<&mut Self> {
        self.send(&command::psubscribe(patterns))?;
        self.state.insert(SubscriptionState::PSUBSCRIBED);
        Ok(self)
    }

    /// Unsubscribe from `channels`, or from every channel when empty.
    pub fn unsubscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> Result<&mut Self> {
        self.send(&command::unsubscribe(channels))?;
        Ok(self)
    }

    /// Unsubscribe from `patterns`, or from every pattern when empty.
    pub fn punsubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> Result<&mut Self> {
        self.send(&command::punsubscribe(patterns))?;
        Ok(self)
    }

    /// The answer arrives as a [`Message::Pong`].
    pub fn ping(&mut self, payload: Option<&[u8]>) -> Result<&mut Self> {
        self.send(&command::ping(payload))?;
        Ok(self)
    }

    /// Stop consuming. With `drop` the connection is closed on the spot;
    /// otherwise unsubscriptions are sent and the remaining acknowledgements
    /// can still be read. Returns `false` when nothing more will arrive.
    pub fn stop(&mut self, drop: bool) -> Result<bool> {
        if !self.is_valid() {
            return Ok(false);
        }

        if drop {
            self.state.remove(SubscriptionState::VALID);
            self.connection.disconnect();
        } else if !self.state.contains(SubscriptionState::STOPPING) {
            if self.state.contains(SubscriptionState::SUBSCRIBED) {
                self.unsubscribe::<&[u8]>(&[])?;
            }
            if self.state.contains(SubscriptionState::PSUBSCRIBED) {
                self.punsubscribe::<&[u8]>(&[])?;
            }
            self.state.insert(SubscriptionState::STOPPING);
        }
        Ok(!drop)
    }

    fn send(&mut self, cmd: &RawCommand) -> Result<()> {
        self.connection.write_request(cmd)
    }

    fn read_message(&mut self) -> Result<Message> {
        let reply = self.connection.read_reply().inspect_err(|err| {
            if err.is_communication() {
                self.state.remove(SubscriptionState::VALID);
            }
        })?;

        let items = match reply {
            Reply::Array(items) => items,
            Reply::Error(err) => return Err(Error::Server(err)),
            other => {
                return Err(self.malformed(format!(
                    "expected a message array, got {} reply",
                    other.type_name()
                )))
            }
        };

        let mut items = items.into_iter();
        let kind = match items.next().as_ref().and_then(Reply::as_str) {
            Some(kind) => kind.to_ascii_lowercase(),
            None => return Err(self.malformed("message without a kind".into())),
        };

        if let Some(ack) = AckKind::from_kind(&kind) {
            let channel = items.next().and_then(into_bytes);
            let count = match items.next().as_ref().and_then(Reply::as_int) {
                Some(count) => count,
                None => return Err(self.malformed(format!("{kind} without a count"))),
            };
            if count == 0 {
                self.state.remove(SubscriptionState::VALID);
            }
            return Ok(Message::Ack {
                kind: ack,
                channel,
                count,
            });
        }

        match kind.as_str() {
            "message" => {
                let channel = self.field(items.next(), "message channel")?;
                let payload = self.field(items.next(), "message payload")?;
                Ok(Message::Message { channel, payload })
            }
            "pmessage" => {
                let pattern = self.field(items.next(), "pmessage pattern")?;
                let channel = self.field(items.next(), "pmessage channel")?;
                let payload = self.field(items.next(), "pmessage payload")?;
                Ok(Message::PMessage {
                    pattern,
                    channel,
                    payload,
                })
            }
            "pong" => Ok(Message::Pong {
                payload: items.next().and_then(into_bytes).unwrap_or_default(),
            }),
            other => Err(Error::client(format!("unknown message type '{other}'"))),
        }
    }

    fn field(&mut self, item: Option<Reply>, what: &str) -> Result<Bytes> {
        match item.and_then(into_bytes) {
            Some(bytes) => Ok(bytes),
            None => Err(self.malformed(format!("missing {what}"))),
        }
    }

    fn malformed(&mut self, message: String) -> Error {
        let endpoint = self.connection.identifier();
        tracing::warn!(endpoint = %endpoint, %message, "malformed pub/sub message");
        self.state.remove(SubscriptionState::VALID);
        self.connection.disconnect();
        Error::Protocol { endpoint, message }
    }
}

fn into_bytes(reply: Reply) -> Option<Bytes> {
    match reply {
        Reply::Bulk(bytes) => Some(bytes),
        Reply::Status(text) => Some(Bytes::from(text)),
        _ => None,
    }
}

impl Iterator for Subscription<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.is_valid() {
            return None;
        }
        let message = self.read_message();
        if message.is_ok() {
            self.position += 1;
        }
        Some(message)
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Err(err) = self.stop(false) {
            tracing::warn!(error = %err, "failed to unsubscribe");
        }
        self.state.remove(SubscriptionState::VALID);
        self.connection.disconnect();
    }
}

impl fmt::Debug for Subscription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("state", &self.state)
            .field("position", &self.position)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
