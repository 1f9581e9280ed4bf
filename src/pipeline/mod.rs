//! Command pipelining.
//!
//! A [`Pipeline`] queues commands and sends them in batches through one of
//! the [`executor`] strategies, trading per-command round trips for a single
//! write followed by a single read pass.

pub mod executor;

pub use executor::{
    Executor, FireAndForgetExecutor, Outcome, SafeClusterExecutor, SafeExecutor,
    StandardExecutor,
};

use std::fmt;

use crate::command::{Command, RawCommand};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::resp::ReplyReader;

/// How a pipeline reacts to failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelinePolicy {
    /// Abort the batch on the first failure.
    #[default]
    Standard,
    /// Keep going; failures become per-command outcomes. Isolated per
    /// endpoint when the connection is a cluster.
    Safe,
    /// Do not read replies at all.
    FireAndForget,
}

/// Queues commands and flushes them through an executor.
pub struct Pipeline<'a> {
    connection: &'a mut dyn Connection,
    policy: PipelinePolicy,
    reader: ReplyReader,
    queue: Vec<Box<dyn Command>>,
    results: Vec<Outcome>,
    running: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(connection: &'a mut dyn Connection) -> Self {
        Self::with_policy(connection, PipelinePolicy::Standard, ReplyReader::default())
    }

    pub fn with_policy(
        connection: &'a mut dyn Connection,
        policy: PipelinePolicy,
        reader: ReplyReader,
    ) -> Self {
        Self {
            connection,
            policy,
            reader,
            queue: Vec::new(),
            results: Vec::new(),
            running: false,
        }
    }

    pub fn policy(&self) -> PipelinePolicy {
        self.policy
    }

    /// Number of commands waiting to be sent.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue a command.
    pub fn queue(&mut self, cmd: impl Command + 'static) -> &mut Self {
        self.queue.push(Box::new(cmd));
        self
    }

    /// Queue a command given as identifier and arguments.
    pub fn command<I, A>(&mut self, id: &str, arguments: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.queue(RawCommand::new(id, arguments))
    }

    /// Send the queued commands (when `send` is true) or drop them. Results
    /// of sent commands accumulate until the pipeline finishes.
    pub fn flush(&mut self, send: bool) -> Result<&mut Self> {
        let commands = std::mem::take(&mut self.queue);
        if send && !commands.is_empty() {
            let executor = self.executor();
            let results = executor.execute(&mut *self.connection, &commands)?;
            self.results.extend(results);
        }
        Ok(self)
    }

    /// Run `callback` to fill the pipeline, then send everything that was
    /// queued and return every outcome in order.
    ///
    /// If the callback fails, nothing left in the queue is sent and the
    /// callback's error is returned.
    pub fn execute<F>(&mut self, callback: F) -> Result<Vec<Outcome>>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.running {
            return Err(Error::client("the pipeline is already being executed"));
        }

        self.running = true;
        let outcome = callback(self).and_then(|()| self.flush(true).map(|_| ()));
        self.running = false;

        match outcome {
            Ok(()) => Ok(std::mem::take(&mut self.results)),
            Err(err) => {
                self.queue.clear();
                self.results.clear();
                Err(err)
            }
        }
    }

    /// Send whatever is queued and return every outcome.
    pub fn run(&mut self) -> Result<Vec<Outcome>> {
        self.execute(|_| Ok(()))
    }

    fn executor(&self) -> Box<dyn Executor> {
        match self.policy {
            PipelinePolicy::Standard => Box::new(StandardExecutor::new(self.reader)),
            PipelinePolicy::Safe if self.connection.is_cluster() => Box::new(SafeClusterExecutor),
            PipelinePolicy::Safe => Box::new(SafeExecutor),
            PipelinePolicy::FireAndForget => Box::new(FireAndForgetExecutor),
        }
    }
}

impl fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policy", &self.policy)
            .field("queued", &self.queue.len())
            .field("results", &self.results.len())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
