use std::future::Future;
use std::io;

/// One live text-frame connection to the push endpoint.
pub trait PushSocket: Send + 'static {
    fn send(&mut self, text: &str) -> impl Future<Output = io::Result<()>> + Send;

    /// Next inbound text frame. `None` means the peer closed the connection.
    fn recv(&mut self) -> impl Future<Output = Option<io::Result<String>>> + Send;
}

/// Dials the push endpoint. The client owns reconnect policy; a connector
/// only knows how to produce a fresh socket for a given access token.
pub trait Connector: Send + Sync + 'static {
    type Socket: PushSocket;

    fn connect(&self, token: &str) -> impl Future<Output = io::Result<Self::Socket>> + Send;
}
