pub mod cluster;
pub mod endpoint;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use cluster::{ClusterConnection, ClusterNode, PoolKey};
pub use endpoint::EndpointConnection;
pub use transport::{ConnectionFactory, Connector, TcpConnector, Transport, UnixConnector};

use crate::command::Command;
use crate::error::Result;
use crate::resp::Reply;

/// Anything commands can be sent through: one endpoint or a cluster of them.
///
/// Replies come back raw: error replies are inline [`Reply::Error`] values
/// and it is up to the caller to decide whether they raise.
pub trait Connection {
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Human readable endpoint description used in fault messages.
    fn identifier(&self) -> String;

    /// Send `cmd` without waiting for its reply.
    fn write_request(&mut self, cmd: &dyn Command) -> Result<()>;

    /// Read the reply to a previously written `cmd`.
    fn read_response(&mut self, cmd: &dyn Command) -> Result<Reply>;

    /// Read one reply that is not tied to a command (pushed messages).
    fn read_reply(&mut self) -> Result<Reply>;

    fn execute_command(&mut self, cmd: &dyn Command) -> Result<Reply>;

    /// Downcast to a cluster, for callers with cluster-specific behavior.
    fn as_cluster(&self) -> Option<&ClusterConnection> {
        None
    }

    fn as_cluster_mut(&mut self) -> Option<&mut ClusterConnection> {
        None
    }

    fn is_cluster(&self) -> bool {
        self.as_cluster().is_some()
    }
}
