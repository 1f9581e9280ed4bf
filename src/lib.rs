//! Blocking client engine for the Redis serialization protocol.
//!
//! Layers, bottom up:
//! - [`resp`]: request encoding and reply parsing, including streamed arrays
//! - [`connection`]: single endpoints and client-side sharded clusters
//! - [`distributor`]: consistent-hash rings used by clusters
//! - [`pipeline`], [`transaction`], [`pubsub`]: request patterns on top of a
//!   connection
//! - [`client`]: the convenience entry point

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod distributor;
pub mod error;
pub mod pipeline;
pub mod pubsub;
pub mod resp;
pub mod transaction;

pub use client::{Client, ClientOptions};
pub use command::{Command, RawCommand};
pub use config::EndpointParameters;
pub use connection::{ClusterConnection, Connection, ConnectionFactory, EndpointConnection};
pub use distributor::{Distributor, HashRing, KetamaRing, RingStrategy};
pub use error::{Error, ErrorKind, ErrorReply, Result};
pub use pipeline::{Outcome, Pipeline, PipelinePolicy};
pub use pubsub::{AckKind, Message, Subscription};
pub use resp::{Reply, ReplyReader};
pub use transaction::{Transaction, TransactionOptions};
