//! Client-side sharding over several independent endpoints.
//!
//! Every endpoint joins both an insertion-ordered pool (keyed by its alias,
//! or by insertion index when it has none) and a consistent-hash ring. A
//! command is sent to whichever endpoint owns the hash of its routing key.
//! There is no server-side topology: no slots, no redirects.

use std::fmt;

use indexmap::IndexMap;

use crate::command::Command;
use crate::connection::endpoint::EndpointConnection;
use crate::connection::Connection;
use crate::distributor::{extract_hash_tag, Distributor, KeyHasher, RingStrategy};
use crate::error::{Error, Result};
use crate::resp::Reply;

/// Key of an endpoint inside the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolKey {
    Alias(String),
    Index(usize),
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias(alias) => f.write_str(alias),
            Self::Index(idx) => write!(f, "{idx}"),
        }
    }
}

impl From<&str> for PoolKey {
    fn from(alias: &str) -> Self {
        Self::Alias(alias.to_string())
    }
}

impl From<usize> for PoolKey {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

/// Ring entry for one endpoint. Its identity on the ring is the endpoint
/// identifier (`host:port` or socket path), not the pool key.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    key: PoolKey,
    identity: String,
}

impl ClusterNode {
    pub fn key(&self) -> &PoolKey {
        &self.key
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// A set of endpoints addressed as one connection.
pub struct ClusterConnection {
    pool: IndexMap<PoolKey, EndpointConnection>,
    distributor: Box<dyn Distributor<ClusterNode> + Send>,
    next_index: usize,
}

impl ClusterConnection {
    /// Empty cluster distributing keys with a CRC32 ring.
    pub fn new() -> Self {
        Self::with_strategy(RingStrategy::default(), None)
    }

    pub fn with_strategy(strategy: RingStrategy, replicas: Option<usize>) -> Self {
        Self {
            pool: IndexMap::new(),
            distributor: strategy.build(replicas),
            next_index: 0,
        }
    }

    /// Add an endpoint, returning its pool key. An endpoint whose alias is
    /// already taken replaces the previous one.
    pub fn add(&mut self, connection: EndpointConnection) -> PoolKey {
        let key = match connection.parameters().alias.as_deref() {
            Some(alias) => PoolKey::Alias(alias.to_string()),
            None => {
                let idx = self.next_index;
                self.next_index += 1;
                PoolKey::Index(idx)
            }
        };

        if self.pool.contains_key(&key) {
            self.remove(&key);
        }

        let node = ClusterNode {
            key: key.clone(),
            identity: connection.identifier().to_string(),
        };
        self.distributor.add(node, connection.parameters().weight);
        self.pool.insert(key.clone(), connection);
        key
    }

    /// Remove an endpoint from both the pool and the ring.
    pub fn remove(&mut self, key: &PoolKey) -> Option<EndpointConnection> {
        let connection = self.pool.shift_remove(key)?;
        let node = ClusterNode {
            key: key.clone(),
            identity: connection.identifier().to_string(),
        };
        self.distributor.remove(&node);
        Some(connection)
    }

    /// Pool key of the endpoint `cmd` routes to.
    pub fn node_for(&self, cmd: &dyn Command) -> Result<PoolKey> {
        let hash = cmd.routing_hash(self).ok_or_else(|| {
            Error::client(format!(
                "cannot use '{}' over clusters of connections",
                cmd.id()
            ))
        })?;
        Ok(self.distributor.get_by_hash(hash)?.key.clone())
    }

    /// Endpoint `cmd` routes to.
    pub fn connection_for(&mut self, cmd: &dyn Command) -> Result<&mut EndpointConnection> {
        let key = self.node_for(cmd)?;
        self.member(&key)
    }

    /// Endpoint owning `key`, honoring hash tags.
    pub fn connection_by_key(&mut self, key: &[u8]) -> Result<&mut EndpointConnection> {
        let hash = self.hash(extract_hash_tag(key));
        let node = self.distributor.get_by_hash(hash)?.key.clone();
        self.member(&node)
    }

    pub fn connection_by_id(&mut self, key: &PoolKey) -> Option<&mut EndpointConnection> {
        self.pool.get_mut(key)
    }

    pub fn connection_by_alias(&mut self, alias: &str) -> Option<&mut EndpointConnection> {
        self.pool.get_mut(&PoolKey::from(alias))
    }

    fn member(&mut self, key: &PoolKey) -> Result<&mut EndpointConnection> {
        self.pool
            .get_mut(key)
            .ok_or_else(|| Error::Distributor(format!("no endpoint registered as '{key}'")))
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Endpoints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&PoolKey, &EndpointConnection)> {
        self.pool.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PoolKey, &mut EndpointConnection)> {
        self.pool.iter_mut()
    }

    pub fn distributor(&self) -> &dyn Distributor<ClusterNode> {
        self.distributor.as_ref()
    }
}

impl Default for ClusterConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyHasher for ClusterConnection {
    fn hash(&self, value: &[u8]) -> u32 {
        self.distributor.hash(value)
    }
}

impl Connection for ClusterConnection {
    /// Connect every member that is not connected yet.
    fn connect(&mut self) -> Result<()> {
        for connection in self.pool.values_mut() {
            if !connection.is_connected() {
                connection.connect()?;
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        for connection in self.pool.values_mut() {
            connection.disconnect();
        }
    }

    /// True when at least one member is connected.
    fn is_connected(&self) -> bool {
        self.pool.values().any(|c| c.is_connected())
    }

    fn identifier(&self) -> String {
        let members: Vec<&str> = self.pool.values().map(|c| c.identifier()).collect();
        members.join(",")
    }

    fn write_request(&mut self, cmd: &dyn Command) -> Result<()> {
        self.connection_for(cmd)?.write_request(cmd)
    }

    fn read_response(&mut self, cmd: &dyn Command) -> Result<Reply> {
        self.connection_for(cmd)?.read_response(cmd)
    }

    fn read_reply(&mut self) -> Result<Reply> {
        Err(Error::client(
            "cannot read a reply without a command over clusters of connections",
        ))
    }

    fn execute_command(&mut self, cmd: &dyn Command) -> Result<Reply> {
        self.connection_for(cmd)?.execute_command(cmd)
    }

    fn as_cluster(&self) -> Option<&ClusterConnection> {
        Some(self)
    }

    fn as_cluster_mut(&mut self) -> Option<&mut ClusterConnection> {
        Some(self)
    }
}

impl fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("pool", &self.pool)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{self, RawCommand};
    use crate::config::EndpointParameters;
    use crate::connection::mock::{text, Captured, MockConnector};

    fn member(port: u16, alias: Option<&str>, script: &[u8]) -> (EndpointConnection, Captured) {
        let mut params = EndpointParameters::tcp("127.0.0.1", port);
        params.alias = alias.map(str::to_string);
        MockConnector::new(script).endpoint(params)
    }

    fn cluster(scripts: [&[u8]; 3]) -> (ClusterConnection, Vec<Captured>) {
        let mut cluster = ClusterConnection::new();
        let mut captured = Vec::new();
        for (i, script) in scripts.into_iter().enumerate() {
            let (conn, written) = member(6379 + i as u16, None, script);
            cluster.add(conn);
            captured.push(written);
        }
        (cluster, captured)
    }

    #[test]
    fn pool_keys() {
        let mut cluster = ClusterConnection::new();
        let (a, _) = member(6379, Some("first"), b"");
        let (b, _) = member(6380, None, b"");
        let (c, _) = member(6381, None, b"");
        assert_eq!(cluster.add(a), PoolKey::Alias("first".into()));
        assert_eq!(cluster.add(b), PoolKey::Index(0));
        assert_eq!(cluster.add(c), PoolKey::Index(1));
        assert_eq!(cluster.len(), 3);
        assert!(cluster.connection_by_alias("first").is_some());
        assert_eq!(
            cluster.connection_by_id(&PoolKey::Index(1)).map(|c| c.identifier().to_string()),
            Some("127.0.0.1:6381".to_string())
        );
    }

    #[test]
    fn routes_by_ring() {
        // Ring placement for these three identities: "foo" → :6381,
        // "bar" → :6379, "session" → :6380.
        let (mut cluster, captured) = cluster([b":1\r\n", b":2\r\n", b":3\r\n"]);
        let reply = cluster.execute_command(&RawCommand::new("INCR", ["foo"])).unwrap();
        assert_eq!(reply, Reply::Integer(3));
        assert!(text(&captured[2]).contains("foo"));
        assert!(captured[0].lock().is_empty());

        let reply = cluster.execute_command(&RawCommand::new("INCR", ["bar"])).unwrap();
        assert_eq!(reply, Reply::Integer(1));
        let reply = cluster.execute_command(&RawCommand::new("INCR", ["session"])).unwrap();
        assert_eq!(reply, Reply::Integer(2));
    }

    #[test]
    fn hash_tags_route_together() {
        let (cluster, _) = cluster([b"", b"", b""]);
        let a = cluster.node_for(&RawCommand::new("GET", ["foo{bar}baz"])).unwrap();
        let b = cluster.node_for(&RawCommand::new("GET", ["bar"])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_hashable_command_rejected() {
        let (mut cluster, _) = cluster([b"", b"", b""]);
        let err = cluster.execute_command(&command::ping(None)).unwrap_err();
        match err {
            Error::Client(msg) => {
                assert_eq!(msg, "cannot use 'PING' over clusters of connections")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cross_node_multi_key_rejected() {
        let (cluster, _) = cluster([b"", b"", b""]);
        let err = cluster.node_for(&RawCommand::new("MGET", ["foo", "bar"])).unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[test]
    fn empty_cluster_lookup() {
        let cluster = ClusterConnection::new();
        let err = cluster.node_for(&RawCommand::new("GET", ["k"])).unwrap_err();
        assert!(matches!(err, Error::Distributor(_)));
    }

    #[test]
    fn remove_takes_node_off_ring() {
        let (mut cluster, _) = cluster([b"", b"", b""]);
        assert_eq!(
            cluster.node_for(&RawCommand::new("GET", ["session"])).unwrap(),
            PoolKey::Index(1)
        );
        let removed = cluster.remove(&PoolKey::Index(1)).unwrap();
        assert_eq!(removed.identifier(), "127.0.0.1:6380");
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster.distributor().len(), 2);
        assert_eq!(
            cluster.node_for(&RawCommand::new("GET", ["session"])).unwrap(),
            PoolKey::Index(2)
        );
    }

    #[test]
    fn alias_replacement() {
        let mut cluster = ClusterConnection::new();
        let (a, _) = member(6379, Some("main"), b"");
        let (b, _) = member(6390, Some("main"), b"");
        cluster.add(a);
        cluster.add(b);
        assert_eq!(cluster.len(), 1);
        assert_eq!(cluster.distributor().len(), 1);
        assert_eq!(
            cluster.connection_by_alias("main").map(|c| c.identifier().to_string()),
            Some("127.0.0.1:6390".to_string())
        );
    }

    #[test]
    fn connect_and_disconnect_fan_out() {
        let (mut cluster, _) = cluster([b"", b"", b""]);
        assert!(!cluster.is_connected());
        cluster.connect().unwrap();
        assert!(cluster.iter().all(|(_, c)| c.is_connected()));
        cluster.disconnect();
        assert!(!cluster.is_connected());
    }

    #[test]
    fn is_connected_when_any_member_is() {
        let (mut cluster, _) = cluster([b"", b"", b""]);
        cluster.connection_by_key(b"foo").unwrap().connect().unwrap();
        assert!(cluster.is_connected());
    }

    #[test]
    fn ketama_strategy() {
        let mut cluster = ClusterConnection::with_strategy(RingStrategy::Ketama, None);
        for port in [6379, 6380, 6381] {
            cluster.add(member(port, None, b"").0);
        }
        // Ketama placement: "foo" → :6379, "key:1" → :6380.
        assert_eq!(
            cluster.node_for(&RawCommand::new("GET", ["foo"])).unwrap(),
            PoolKey::Index(0)
        );
        assert_eq!(
            cluster.node_for(&RawCommand::new("GET", ["key:1"])).unwrap(),
            PoolKey::Index(1)
        );
    }

    #[test]
    fn read_reply_needs_a_command() {
        let (mut cluster, _) = cluster([b"", b"", b""]);
        assert!(matches!(cluster.read_reply(), Err(Error::Client(_))));
    }
}
