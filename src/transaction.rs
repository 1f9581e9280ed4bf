//! MULTI/EXEC transactions with optional WATCH and check-and-set support.
//!
//! A [`Transaction`] borrows a connection for its whole lifetime. Commands
//! can be queued fluently (`multi`, `command`, `exec`) or from a block passed
//! to [`Transaction::execute`], which also drives automatic retries when the
//! server aborts EXEC because a watched key changed.

use std::fmt;
use std::mem;

use bitflags::bitflags;
use bytes::Bytes;

use crate::command::{self, Command, RawCommand};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::resp::{Reply, ReplyReader};

bitflags! {
    /// Progress of a transaction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransactionState: u8 {
        /// MULTI was sent (or CAS mode entered).
        const INITIALIZED  = 1 << 0;
        /// A transaction block is running.
        const INSIDE_BLOCK = 1 << 1;
        /// The previous attempt was discarded.
        const DISCARDED    = 1 << 2;
        /// Commands run immediately until `multi()`.
        const CAS          = 1 << 3;
        /// WATCH is pending on the connection.
        const WATCH        = 1 << 4;
    }
}

/// Behavior switches for a transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Check-and-set mode: commands issued before `multi()` are executed
    /// right away instead of being queued.
    pub cas: bool,
    /// Keys watched as soon as the transaction initializes.
    pub watch: Vec<Bytes>,
    /// How many times a block is re-run when EXEC is aborted.
    pub retry: usize,
}

impl TransactionOptions {
    pub fn cas(mut self, enabled: bool) -> Self {
        self.cas = enabled;
        self
    }

    pub fn watch<I, A>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.watch = keys
            .into_iter()
            .map(|k| Bytes::copy_from_slice(k.as_ref()))
            .collect();
        self
    }

    pub fn retry(mut self, attempts: usize) -> Self {
        self.retry = attempts;
        self
    }
}

/// A MULTI/EXEC block over a single endpoint.
pub struct Transaction<'a> {
    connection: &'a mut dyn Connection,
    reader: ReplyReader,
    options: TransactionOptions,
    state: TransactionState,
    commands: Vec<Box<dyn Command>>,
}

impl<'a> Transaction<'a> {
    /// Fails with a client error when `connection` is a cluster: the queued
    /// commands could land on different endpoints.
    pub fn new(
        connection: &'a mut dyn Connection,
        options: TransactionOptions,
        reader: ReplyReader,
    ) -> Result<Self> {
        if connection.is_cluster() {
            return Err(Error::client(
                "cannot initialize a MULTI/EXEC transaction over clusters of connections",
            ));
        }

        Ok(Self {
            connection,
            reader,
            options,
            state: TransactionState::empty(),
            commands: Vec::new(),
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state.contains(TransactionState::INITIALIZED)
    }

    pub fn is_watching(&self) -> bool {
        self.state.contains(TransactionState::WATCH)
    }

    pub fn is_discarded(&self) -> bool {
        self.state.contains(TransactionState::DISCARDED)
    }

    /// Number of commands queued for EXEC.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        if self.options.cas {
            self.state.insert(TransactionState::CAS);
        }

        if !self.options.watch.is_empty() {
            let keys = self.options.watch.clone();
            self.watch(&keys)?;
        }

        let discarded = self.is_discarded();
        if !self.options.cas || discarded {
            self.call(&command::multi())?;
            if discarded {
                self.state.remove(TransactionState::CAS);
            }
        }

        self.state.remove(TransactionState::DISCARDED);
        self.state.insert(TransactionState::INITIALIZED);
        Ok(())
    }

    /// Send WATCH for `keys`. Not allowed once MULTI has been sent.
    pub fn watch<A: AsRef<[u8]>>(&mut self, keys: &[A]) -> Result<Reply> {
        if self.is_initialized() && !self.state.contains(TransactionState::CAS) {
            return Err(Error::client("sending WATCH after MULTI is not allowed"));
        }

        let reply = self.call(&command::watch(keys))?;
        self.state.insert(TransactionState::WATCH);
        Ok(reply)
    }

    /// Start queuing. In CAS mode this is the point where MULTI goes out.
    pub fn multi(&mut self) -> Result<&mut Self> {
        if self
            .state
            .contains(TransactionState::INITIALIZED | TransactionState::CAS)
        {
            self.state.remove(TransactionState::CAS);
            self.call(&command::multi())?;
        } else {
            self.initialize()?;
        }
        Ok(self)
    }

    /// Forget every watched key.
    pub fn unwatch(&mut self) -> Result<Reply> {
        self.state.remove(TransactionState::WATCH);
        if self.is_initialized() && !self.state.contains(TransactionState::CAS) {
            self.queue(command::unwatch())
        } else {
            self.call(&command::unwatch())
        }
    }

    /// Throw away the queued commands and reset. A transaction still in CAS
    /// mode only releases its watched keys.
    pub fn discard(&mut self) -> Result<&mut Self> {
        if self.is_initialized() {
            let cmd = if self.state.contains(TransactionState::CAS) {
                command::unwatch()
            } else {
                command::discard()
            };
            self.call(&cmd)?;
            self.reset();
            self.state.insert(TransactionState::DISCARDED);
        } else if self.is_watching() {
            self.call(&command::unwatch())?;
            self.reset();
        }
        Ok(self)
    }

    /// Queue `cmd` for EXEC, or run it right away in CAS mode.
    ///
    /// Returns the `QUEUED` acknowledgement (or the immediate reply). Any
    /// other acknowledgement means client and server disagree about the
    /// transaction, so the connection is dropped.
    pub fn queue(&mut self, cmd: impl Command + 'static) -> Result<Reply> {
        self.initialize()?;

        if self.state.contains(TransactionState::CAS) {
            let reply = self.connection.execute_command(&cmd)?;
            return self.reader.check(reply);
        }

        let reply = self.connection.execute_command(&cmd)?;
        if reply.is_queued() {
            self.commands.push(Box::new(cmd));
            return Ok(reply);
        }

        Err(self.protocol_fault(format!(
            "expected +QUEUED for '{}', got {} reply",
            cmd.id(),
            reply.type_name()
        )))
    }

    /// Queue a command given as identifier and arguments.
    pub fn command<I, A>(&mut self, id: &str, arguments: I) -> Result<Reply>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.queue(RawCommand::new(id, arguments))
    }

    /// Send EXEC for the fluently queued commands.
    pub fn exec(&mut self) -> Result<Vec<Reply>> {
        self.check_before_execution(false)?;
        self.commit()?.ok_or_else(aborted)
    }

    /// Run `block` to queue commands, then EXEC them. The block runs again
    /// (up to the `retry` option) whenever the server aborts EXEC.
    ///
    /// Communication and server errors from the block are returned as they
    /// are. Any other error discards the transaction first.
    pub fn execute<F>(&mut self, mut block: F) -> Result<Vec<Reply>>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        self.check_before_execution(true)?;

        let mut attempts = self.options.retry;
        loop {
            self.run_block(&mut block)?;
            match self.commit()? {
                Some(replies) => return Ok(replies),
                None if attempts > 0 => {
                    attempts -= 1;
                    tracing::debug!(attempts_left = attempts, "transaction aborted, retrying");
                }
                None => return Err(aborted()),
            }
        }
    }

    fn check_before_execution(&mut self, with_block: bool) -> Result<()> {
        if self.state.contains(TransactionState::INSIDE_BLOCK) {
            return Err(Error::client(
                "cannot invoke exec or execute inside an active transaction block",
            ));
        }

        if with_block {
            if !self.commands.is_empty() {
                self.discard()?;
                return Err(Error::client(
                    "cannot execute a transaction block after using the fluent interface",
                ));
            }
        } else if self.options.retry > 0 {
            self.discard()?;
            return Err(Error::client(
                "automatic retries are supported only with a transaction block",
            ));
        }
        Ok(())
    }

    fn run_block<F>(&mut self, block: &mut F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        self.state.insert(TransactionState::INSIDE_BLOCK);
        let outcome = block(self);
        self.state.remove(TransactionState::INSIDE_BLOCK);

        match outcome {
            Err(err) if !err.is_communication() && !err.is_server() => {
                if let Err(discard_err) = self.discard() {
                    tracing::warn!(error = %discard_err, "failed to discard transaction");
                }
                Err(err)
            }
            other => other,
        }
    }

    /// Send EXEC. `None` means the server aborted the transaction.
    fn commit(&mut self) -> Result<Option<Vec<Reply>>> {
        if self.commands.is_empty() {
            if self
                .state
                .intersects(TransactionState::INITIALIZED | TransactionState::WATCH)
            {
                self.discard()?;
            }
            self.reset();
            return Ok(Some(Vec::new()));
        }

        let reply = self.connection.execute_command(&command::exec());
        let commands = mem::take(&mut self.commands);
        self.reset();

        let items = match reply? {
            Reply::Array(items) => items,
            Reply::Null => return Ok(None),
            Reply::Error(err) => return Err(Error::Server(err)),
            other => {
                return Err(self.protocol_fault(format!(
                    "unexpected {} reply to EXEC",
                    other.type_name()
                )))
            }
        };

        if items.len() != commands.len() {
            return Err(self.protocol_fault(format!(
                "EXEC returned {} replies for {} queued commands",
                items.len(),
                commands.len()
            )));
        }

        let mut replies = Vec::with_capacity(items.len());
        for (item, cmd) in items.into_iter().zip(&commands) {
            let reply = match item {
                Reply::Error(err) if !self.reader.is_silent() => return Err(Error::Server(err)),
                item @ (Reply::Error(_) | Reply::Status(_)) => item,
                item => cmd.parse_reply(item)?,
            };
            replies.push(reply);
        }
        Ok(Some(replies))
    }

    /// Execute a control command; error replies always raise.
    fn call(&mut self, cmd: &RawCommand) -> Result<Reply> {
        match self.connection.execute_command(cmd)? {
            Reply::Error(err) => Err(Error::Server(err)),
            reply => Ok(reply),
        }
    }

    fn protocol_fault(&mut self, message: String) -> Error {
        let endpoint = self.connection.identifier();
        tracing::warn!(endpoint = %endpoint, %message, "transaction protocol fault");
        self.connection.disconnect();
        self.reset();
        Error::Protocol { endpoint, message }
    }

    fn reset(&mut self) {
        self.state = TransactionState::empty();
        self.commands.clear();
    }
}

fn aborted() -> Error {
    Error::Aborted("the current transaction has been aborted by the server".into())
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("queued", &self.commands.len())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
