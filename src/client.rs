//! High-level entry point tying connections, pipelines, transactions and
//! pub/sub together.

use std::fmt;

use bytes::Bytes;

use crate::command::{self, Command, RawCommand};
use crate::config::EndpointParameters;
use crate::connection::{ClusterConnection, Connection, ConnectionFactory, PoolKey};
use crate::distributor::RingStrategy;
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, PipelinePolicy};
use crate::pubsub::Subscription;
use crate::resp::{Reply, ReplyReader};
use crate::transaction::{Transaction, TransactionOptions};

/// Client-wide behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientOptions {
    /// Hand error replies back as [`Reply::Error`] values instead of
    /// raising [`Error::Server`].
    pub silent_errors: bool,
    /// Ring flavor used when the client is built over several endpoints.
    pub strategy: RingStrategy,
    /// Base replicas per endpoint on the ring; `None` keeps the ring default.
    pub replicas: Option<usize>,
}

impl ClientOptions {
    pub fn silent_errors(mut self, silent: bool) -> Self {
        self.silent_errors = silent;
        self
    }

    pub fn strategy(mut self, strategy: RingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = Some(replicas);
        self
    }

    fn reader(&self) -> ReplyReader {
        ReplyReader::new(self.silent_errors)
    }
}

/// A blocking client over one endpoint or a cluster of endpoints.
pub struct Client {
    connection: Box<dyn Connection + Send>,
    options: ClientOptions,
}

impl Client {
    /// Wrap an already built connection.
    pub fn new(connection: impl Connection + Send + 'static, options: ClientOptions) -> Self {
        Self {
            connection: Box::new(connection),
            options,
        }
    }

    /// Client for a single endpoint given as URI, e.g. `redis://localhost:6379/2`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let params = EndpointParameters::from_uri(uri)?;
        Self::from_parameters(params, ClientOptions::default())
    }

    pub fn from_parameters(params: EndpointParameters, options: ClientOptions) -> Result<Self> {
        Self::with_factory(&ConnectionFactory::default(), params, options)
    }

    /// Single endpoint built by `factory`, for custom connection schemes.
    pub fn with_factory(
        factory: &ConnectionFactory,
        params: EndpointParameters,
        options: ClientOptions,
    ) -> Result<Self> {
        let connection = factory.create(params)?;
        Ok(Self::new(connection, options))
    }

    /// Client sharding keys over `nodes` with the ring set in `options`.
    pub fn cluster<I>(nodes: I, options: ClientOptions) -> Result<Self>
    where
        I: IntoIterator<Item = EndpointParameters>,
    {
        Self::cluster_with_factory(&ConnectionFactory::default(), nodes, options)
    }

    pub fn cluster_with_factory<I>(
        factory: &ConnectionFactory,
        nodes: I,
        options: ClientOptions,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = EndpointParameters>,
    {
        let mut cluster = ClusterConnection::with_strategy(options.strategy, options.replicas);
        for params in nodes {
            cluster.add(factory.create(params)?);
        }
        if cluster.is_empty() {
            return Err(Error::client("a cluster needs at least one endpoint"));
        }
        tracing::debug!(endpoints = cluster.len(), strategy = ?options.strategy, "cluster client created");
        Ok(Self::new(cluster, options))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        &mut *self.connection
    }

    pub fn is_cluster(&self) -> bool {
        self.connection.is_cluster()
    }

    /// One member of a cluster, by alias or insertion index.
    pub fn cluster_member(
        &mut self,
        key: impl Into<PoolKey>,
    ) -> Result<&mut dyn Connection> {
        let cluster = self
            .connection
            .as_cluster_mut()
            .ok_or_else(|| Error::client("the client is not connected to a cluster"))?;
        let key = key.into();
        match cluster.connection_by_id(&key) {
            Some(member) => Ok(member as &mut dyn Connection),
            None => Err(Error::client(format!("no cluster member '{key}'"))),
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        self.connection.connect()
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Send `cmd` and return its reply, raising error replies unless the
    /// client is in silent mode.
    pub fn execute_command(&mut self, cmd: &dyn Command) -> Result<Reply> {
        let reply = self.connection.execute_command(cmd)?;
        self.options.reader().check(reply)
    }

    /// Send the command `id` with `arguments`.
    pub fn execute<I, A>(&mut self, id: &str, arguments: I) -> Result<Reply>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.execute_command(&RawCommand::new(id, arguments))
    }

    // ── Convenience commands ───────────────────────────────────────

    pub fn ping(&mut self) -> Result<Reply> {
        self.execute_command(&command::ping(None))
    }

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        match self.execute("GET", [key.as_ref()])? {
            Reply::Bulk(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<Reply> {
        self.execute("SET", [key.as_ref(), value.as_ref()])
    }

    pub fn del(&mut self, key: impl AsRef<[u8]>) -> Result<i64> {
        let reply = self.execute("DEL", [key.as_ref()])?;
        Ok(reply.as_int().unwrap_or(0))
    }

    pub fn incr(&mut self, key: impl AsRef<[u8]>) -> Result<Reply> {
        self.execute("INCR", [key.as_ref()])
    }

    pub fn publish(&mut self, channel: impl AsRef<[u8]>, message: impl AsRef<[u8]>) -> Result<Reply> {
        self.execute("PUBLISH", [channel.as_ref(), message.as_ref()])
    }

    /// Close the connection politely.
    pub fn quit(&mut self) -> Result<()> {
        self.connection.execute_command(&command::quit())?;
        Ok(())
    }

    // ── Abstractions ───────────────────────────────────────────────

    /// Pipeline that aborts on the first failure.
    pub fn pipeline(&mut self) -> Pipeline<'_> {
        self.pipeline_with(PipelinePolicy::Standard)
    }

    pub fn pipeline_with(&mut self, policy: PipelinePolicy) -> Pipeline<'_> {
        let reader = self.options.reader();
        Pipeline::with_policy(&mut *self.connection, policy, reader)
    }

    pub fn transaction(&mut self, options: TransactionOptions) -> Result<Transaction<'_>> {
        let reader = self.options.reader();
        Transaction::new(&mut *self.connection, options, reader)
    }

    pub fn pubsub(&mut self) -> Result<Subscription<'_>> {
        Subscription::new(&mut *self.connection)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.connection.identifier())
            .field("cluster", &self.connection.is_cluster())
            .field("options", &self.options)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointParameters;
    use crate::connection::mock::{endpoint, text, MockConnector};

    #[test]
    fn execute_raises_error_replies() {
        let (conn, _) = endpoint(b"-WRONGTYPE Operation against a key\r\n");
        let mut client = Client::new(conn, ClientOptions::default());
        let err = client.execute("INCR", ["s"]).unwrap_err();
        assert_eq!(err.server_reply().unwrap().code(), "WRONGTYPE");
    }

    #[test]
    fn silent_errors_stay_inline() {
        let (conn, _) = endpoint(b"-ERR bad\r\n");
        let mut client = Client::new(conn, ClientOptions::default().silent_errors(true));
        let reply = client.execute("INCR", ["s"]).unwrap();
        assert!(reply.is_error());
    }

    #[test]
    fn convenience_commands() {
        let (conn, written) = endpoint(b"+OK\r\n$1\r\nv\r\n$-1\r\n:1\r\n+PONG\r\n");
        let mut client = Client::new(conn, ClientOptions::default());
        assert!(client.set("k", "v").unwrap().is_ok());
        assert_eq!(client.get("k").unwrap(), Some(Bytes::from_static(b"v")));
        assert_eq!(client.get("missing").unwrap(), None);
        assert_eq!(client.del("k").unwrap(), 1);
        assert_eq!(client.ping().unwrap(), Reply::status("PONG"));
        assert!(text(&written).starts_with("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"));
    }

    #[test]
    fn quit_disconnects() {
        let (conn, _) = endpoint(b"");
        let mut client = Client::new(conn, ClientOptions::default());
        client.quit().unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn cluster_member_lookup() {
        let mut cluster = ClusterConnection::new();
        let (a, _) = MockConnector::new(b"")
            .endpoint(EndpointParameters::tcp("10.0.0.1", 6379).with_alias("first"));
        let (b, _) = MockConnector::new(b"").endpoint(EndpointParameters::tcp("10.0.0.2", 6379));
        cluster.add(a);
        cluster.add(b);

        let mut client = Client::new(cluster, ClientOptions::default());
        assert!(client.is_cluster());
        assert_eq!(client.cluster_member("first").unwrap().identifier(), "10.0.0.1:6379");
        assert_eq!(client.cluster_member(0usize).unwrap().identifier(), "10.0.0.2:6379");
        assert!(client.cluster_member("nope").is_err());
        assert!(client.transaction(TransactionOptions::default()).is_err());
        assert!(client.pubsub().is_err());
    }

    #[test]
    fn empty_cluster_rejected() {
        let err = Client::cluster(Vec::new(), ClientOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[test]
    fn unknown_scheme_rejected() {
        let factory = ConnectionFactory::empty();
        let err = Client::with_factory(&factory, EndpointParameters::default(), ClientOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }
}
