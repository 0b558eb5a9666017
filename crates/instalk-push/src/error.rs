use thiserror::Error;

/// Why a push connection (or the whole channel) went down.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("heartbeat failed: {0}")]
    Heartbeat(std::io::Error),

    #[error("read error: {0}")]
    Read(std::io::Error),

    #[error("closed by server")]
    ServerClosed,

    #[error("event channel closed")]
    ChannelClosed,

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}
