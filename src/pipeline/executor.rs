//! Strategies for sending a batch of commands and collecting their replies.
//!
//! All executors return one [`Outcome`] per command, in command order. They
//! differ in how much a failure is allowed to take down:
//!
//! - [`StandardExecutor`]: any failure aborts the whole batch.
//! - [`SafeExecutor`]: failures become per-slot outcomes on one endpoint.
//! - [`SafeClusterExecutor`]: failures are isolated per cluster endpoint.
//! - [`FireAndForgetExecutor`]: replies are never read.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::Command;
use crate::connection::{Connection, PoolKey};
use crate::error::{Error, Result};
use crate::resp::{Reply, ReplyReader};

/// Result slot for one pipelined command. Faults that hit several slots share
/// one `Arc`.
pub type Outcome = std::result::Result<Reply, Arc<Error>>;

/// Sends a batch of commands over a connection.
pub trait Executor {
    fn execute(
        &self,
        connection: &mut dyn Connection,
        commands: &[Box<dyn Command>],
    ) -> Result<Vec<Outcome>>;
}

// ── Standard ───────────────────────────────────────────────────────

/// Write everything, then read everything. The first failure is returned,
/// partial results are dropped and the connection is closed. An error reply
/// counts as a failure unless the reader is silent.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExecutor {
    reader: ReplyReader,
}

impl StandardExecutor {
    pub fn new(reader: ReplyReader) -> Self {
        Self { reader }
    }
}

impl Executor for StandardExecutor {
    fn execute(
        &self,
        connection: &mut dyn Connection,
        commands: &[Box<dyn Command>],
    ) -> Result<Vec<Outcome>> {
        for cmd in commands {
            connection.write_request(cmd.as_ref())?;
        }

        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            let reply = connection
                .read_response(cmd.as_ref())
                .and_then(|reply| self.reader.check(reply));
            match reply {
                Ok(reply) => results.push(Ok(reply)),
                Err(err) => {
                    // Later replies are still on the wire.
                    connection.disconnect();
                    return Err(err);
                }
            }
        }
        Ok(results)
    }
}

// ── Safe ───────────────────────────────────────────────────────────

/// Never fails as a whole: error replies stay inline, and a communication
/// fault fills every slot it prevents from being answered.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeExecutor;

impl Executor for SafeExecutor {
    fn execute(
        &self,
        connection: &mut dyn Connection,
        commands: &[Box<dyn Command>],
    ) -> Result<Vec<Outcome>> {
        for cmd in commands {
            if let Err(err) = connection.write_request(cmd.as_ref()) {
                let fault = Arc::new(err);
                return Ok(vec![Err(fault); commands.len()]);
            }
        }

        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            match connection.read_response(cmd.as_ref()) {
                Ok(reply) => results.push(Ok(reply)),
                Err(err) if err.is_communication() => {
                    let fault = Arc::new(err);
                    results.resize(commands.len(), Err(fault));
                    break;
                }
                Err(err) => results.push(Err(Arc::new(err))),
            }
        }
        Ok(results)
    }
}

// ── Safe cluster ───────────────────────────────────────────────────

/// Like [`SafeExecutor`], but a fault only affects the commands routed to
/// the endpoint it happened on. Commands are routed before any I/O, so an
/// unroutable command fails the whole batch up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeClusterExecutor;

impl Executor for SafeClusterExecutor {
    fn execute(
        &self,
        connection: &mut dyn Connection,
        commands: &[Box<dyn Command>],
    ) -> Result<Vec<Outcome>> {
        let cluster = match connection.as_cluster_mut() {
            Some(cluster) => cluster,
            None => return SafeExecutor.execute(connection, commands),
        };

        let routes = commands
            .iter()
            .map(|cmd| cluster.node_for(cmd.as_ref()))
            .collect::<Result<Vec<PoolKey>>>()?;

        let mut faults: HashMap<PoolKey, Arc<Error>> = HashMap::new();

        for (cmd, key) in commands.iter().zip(&routes) {
            if faults.contains_key(key) {
                continue;
            }
            let Some(endpoint) = cluster.connection_by_id(key) else {
                continue;
            };
            if let Err(err) = endpoint.write_request(cmd.as_ref()) {
                tracing::warn!(node = %key, error = %err, "pipeline write failed");
                faults.insert(key.clone(), Arc::new(err));
            }
        }

        let mut results = Vec::with_capacity(commands.len());
        for (cmd, key) in commands.iter().zip(&routes) {
            if let Some(fault) = faults.get(key) {
                results.push(Err(Arc::clone(fault)));
                continue;
            }
            let Some(endpoint) = cluster.connection_by_id(key) else {
                results.push(Err(Arc::new(Error::Distributor(format!(
                    "no endpoint registered as '{key}'"
                )))));
                continue;
            };
            match endpoint.read_response(cmd.as_ref()) {
                Ok(reply) => results.push(Ok(reply)),
                Err(err) if err.is_communication() => {
                    let fault = Arc::new(err);
                    faults.insert(key.clone(), Arc::clone(&fault));
                    results.push(Err(fault));
                }
                Err(err) => results.push(Err(Arc::new(err))),
            }
        }
        Ok(results)
    }
}

// ── Fire and forget ────────────────────────────────────────────────

/// Write everything, read nothing, then disconnect so that unread replies
/// cannot leak into later requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FireAndForgetExecutor;

impl Executor for FireAndForgetExecutor {
    fn execute(
        &self,
        connection: &mut dyn Connection,
        commands: &[Box<dyn Command>],
    ) -> Result<Vec<Outcome>> {
        for cmd in commands {
            connection.write_request(cmd.as_ref())?;
        }
        connection.disconnect();
        Ok(Vec::new())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
