//! The command contract and a generic command implementation.
//!
//! Connections, pipelines and transactions only ever see `dyn Command`:
//! an identifier, ordered binary arguments, routing metadata and a hook to
//! reshape the raw reply. [`RawCommand`] covers any command given as an
//! identifier plus arguments.

use std::cell::Cell;
use std::fmt;

use bytes::Bytes;

use crate::distributor::{extract_hash_tag, KeyHasher};
use crate::error::{Error, Result};
use crate::resp::{encode_command, Reply};

/// Reshapes a raw reply into the command's result.
pub type ReplyTransformer = fn(Reply) -> Result<Reply>;

/// What connections need to know about a request.
pub trait Command {
    /// Upper-case command identifier, e.g. `SET`.
    fn id(&self) -> &str;

    fn arguments(&self) -> &[Bytes];

    fn set_arguments(&mut self, arguments: Vec<Bytes>);

    /// Whether the command can be routed by key across a cluster.
    fn is_hashable(&self) -> bool {
        true
    }

    /// Whether the server closes the connection after this command.
    fn closes_connection(&self) -> bool {
        false
    }

    /// Key the command is routed by.
    fn routing_key(&self) -> Option<&[u8]> {
        self.arguments().first().map(|arg| &arg[..])
    }

    /// Hash of the routing key (reduced to its hash tag), or `None` when the
    /// command cannot be routed.
    fn routing_hash(&self, hasher: &dyn KeyHasher) -> Option<u32> {
        if !self.is_hashable() {
            return None;
        }
        self.routing_key()
            .map(|key| hasher.hash(extract_hash_tag(key)))
    }

    /// Turn the raw reply into the command's result. Not called for status
    /// or error replies.
    fn parse_reply(&self, reply: Reply) -> Result<Reply> {
        Ok(reply)
    }

    /// RESP wire form of the request.
    fn serialize(&self) -> Vec<u8> {
        encode_command(self.id(), self.arguments())
    }
}

// ── Key positions ──────────────────────────────────────────────────

/// Where the keys of a command live in its argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySpec {
    /// Not routable by key.
    None,
    /// First argument only.
    First,
    /// Every argument.
    All,
    /// Every other argument, starting with the first (`MSET k v k v`).
    Interleaved,
    /// Every argument except the trailing timeout (`BLPOP k1 k2 0`).
    AllButLast,
    /// `EVAL script numkeys key…`.
    Script,
}

fn key_spec(id: &str) -> KeySpec {
    match id {
        // Key-less commands
        "PING" | "ECHO" | "INFO" | "DBSIZE" | "CLUSTER" | "CONFIG" | "CLIENT" | "COMMAND"
        | "TIME" | "RANDOMKEY" | "WAIT" | "SAVE" | "BGSAVE" | "BGREWRITEAOF" | "FLUSHALL"
        | "FLUSHDB" | "LASTSAVE" | "SLOWLOG" | "DEBUG" | "MULTI" | "EXEC" | "DISCARD"
        | "UNWATCH" | "SCRIPT" | "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE"
        | "PUNSUBSCRIBE" | "PUBLISH" | "QUIT" | "AUTH" | "SELECT" | "KEYS" | "SCAN"
        | "MONITOR" | "SHUTDOWN" | "SLAVEOF" | "REPLICAOF" | "HELLO" | "RESET" => KeySpec::None,
        "DEL" | "UNLINK" | "EXISTS" | "TOUCH" | "MGET" | "WATCH" | "SDIFF" | "SDIFFSTORE"
        | "SINTER" | "SINTERSTORE" | "SUNION" | "SUNIONSTORE" | "RENAME" | "RENAMENX"
        | "RPOPLPUSH" | "LMOVE" | "SMOVE" | "PFCOUNT" | "PFMERGE" => KeySpec::All,
        "MSET" | "MSETNX" => KeySpec::Interleaved,
        "BLPOP" | "BRPOP" | "BRPOPLPUSH" | "BZPOPMIN" | "BZPOPMAX" => KeySpec::AllButLast,
        "EVAL" | "EVALSHA" | "EVAL_RO" | "EVALSHA_RO" => KeySpec::Script,
        _ => KeySpec::First,
    }
}

/// Keys of `args` according to `spec`. `None` when the shape is invalid.
fn keys_of(spec: KeySpec, args: &[Bytes]) -> Option<Vec<&[u8]>> {
    let keys: Vec<&[u8]> = match spec {
        KeySpec::None => return None,
        KeySpec::First => args.first().map(|k| vec![&k[..]])?,
        KeySpec::All => args.iter().map(|k| &k[..]).collect(),
        KeySpec::Interleaved => args.iter().step_by(2).map(|k| &k[..]).collect(),
        KeySpec::AllButLast => {
            let (_, keys) = args.split_last()?;
            keys.iter().map(|k| &k[..]).collect()
        }
        KeySpec::Script => {
            let numkeys: usize = std::str::from_utf8(args.get(1)?).ok()?.parse().ok()?;
            args.get(2..numkeys.checked_add(2)?)?.iter().map(|k| &k[..]).collect()
        }
    };
    (!keys.is_empty()).then_some(keys)
}

// ── RawCommand ─────────────────────────────────────────────────────

/// A command given as identifier and arguments.
///
/// Multi-key commands are routable only when every key hashes to the same
/// point; the routing hash is computed once and remembered.
#[derive(Clone)]
pub struct RawCommand {
    id: String,
    arguments: Vec<Bytes>,
    closes_connection: bool,
    transformer: Option<ReplyTransformer>,
    hash: Cell<Option<Option<u32>>>,
}

impl RawCommand {
    /// Build a command. The identifier is upper-cased.
    pub fn new<I, A>(id: &str, arguments: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let id = id.to_ascii_uppercase();
        let transformer = default_transformer(&id);
        Self {
            closes_connection: id == "QUIT",
            id,
            arguments: arguments
                .into_iter()
                .map(|a| Bytes::copy_from_slice(a.as_ref()))
                .collect(),
            transformer,
            hash: Cell::new(None),
        }
    }

    /// Replace the reply transformer.
    pub fn with_transformer(mut self, transformer: ReplyTransformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    fn key_spec(&self) -> KeySpec {
        key_spec(&self.id)
    }
}

impl Command for RawCommand {
    fn id(&self) -> &str {
        &self.id
    }

    fn arguments(&self) -> &[Bytes] {
        &self.arguments
    }

    fn set_arguments(&mut self, arguments: Vec<Bytes>) {
        self.arguments = arguments;
        self.hash.set(None);
    }

    fn is_hashable(&self) -> bool {
        self.key_spec() != KeySpec::None && !self.arguments.is_empty()
    }

    fn closes_connection(&self) -> bool {
        self.closes_connection
    }

    fn routing_key(&self) -> Option<&[u8]> {
        keys_of(self.key_spec(), &self.arguments).and_then(|keys| keys.first().copied())
    }

    fn routing_hash(&self, hasher: &dyn KeyHasher) -> Option<u32> {
        if let Some(memo) = self.hash.get() {
            return memo;
        }

        let hash = keys_of(self.key_spec(), &self.arguments).and_then(|keys| {
            let mut hashes = keys.iter().map(|k| hasher.hash(extract_hash_tag(k)));
            let first = hashes.next()?;
            hashes.all(|h| h == first).then_some(first)
        });
        self.hash.set(Some(hash));
        hash
    }

    fn parse_reply(&self, reply: Reply) -> Result<Reply> {
        match self.transformer {
            Some(transform) => transform(reply),
            None => Ok(reply),
        }
    }
}

impl fmt::Debug for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCommand")
            .field("id", &self.id)
            .field("arguments", &self.arguments)
            .finish()
    }
}

// ── Reply transformers ─────────────────────────────────────────────

fn default_transformer(id: &str) -> Option<ReplyTransformer> {
    match id {
        "HGETALL" | "CONFIG" => Some(pairs_to_map),
        _ => None,
    }
}

/// `[k1, v1, k2, v2]` → `Map[(k1, v1), (k2, v2)]`. Other shapes pass through.
pub fn pairs_to_map(reply: Reply) -> Result<Reply> {
    match reply {
        Reply::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(Error::client(format!(
                    "cannot build a map from {} elements",
                    items.len()
                )));
            }
            let mut pairs = Vec::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                pairs.push((k, v));
            }
            Ok(Reply::Map(pairs))
        }
        other => Ok(other),
    }
}

// ── Built-in commands ──────────────────────────────────────────────

const NO_ARGS: [&[u8]; 0] = [];

/// `AUTH [username] password`
pub fn auth(username: Option<&str>, password: &str) -> RawCommand {
    match username {
        Some(user) => RawCommand::new("AUTH", [user, password]),
        None => RawCommand::new("AUTH", [password]),
    }
}

pub fn select(database: u32) -> RawCommand {
    RawCommand::new("SELECT", [itoa::Buffer::new().format(database)])
}

pub fn multi() -> RawCommand {
    RawCommand::new("MULTI", NO_ARGS)
}

pub fn exec() -> RawCommand {
    RawCommand::new("EXEC", NO_ARGS)
}

pub fn discard() -> RawCommand {
    RawCommand::new("DISCARD", NO_ARGS)
}

pub fn watch<A: AsRef<[u8]>>(keys: &[A]) -> RawCommand {
    RawCommand::new("WATCH", keys)
}

pub fn unwatch() -> RawCommand {
    RawCommand::new("UNWATCH", NO_ARGS)
}

pub fn ping(message: Option<&[u8]>) -> RawCommand {
    RawCommand::new("PING", message)
}

pub fn quit() -> RawCommand {
    RawCommand::new("QUIT", NO_ARGS)
}

pub fn subscribe<A: AsRef<[u8]>>(channels: &[A]) -> RawCommand {
    RawCommand::new("SUBSCRIBE", channels)
}

pub fn psubscribe<A: AsRef<[u8]>>(patterns: &[A]) -> RawCommand {
    RawCommand::new("PSUBSCRIBE", patterns)
}

pub fn unsubscribe<A: AsRef<[u8]>>(channels: &[A]) -> RawCommand {
    RawCommand::new("UNSUBSCRIBE", channels)
}

pub fn punsubscribe<A: AsRef<[u8]>>(patterns: &[A]) -> RawCommand {
    RawCommand::new("PUNSUBSCRIBE", patterns)
}

// ── Tests ──────────────────────────────────────────────────────────
