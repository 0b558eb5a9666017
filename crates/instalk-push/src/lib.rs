//! Push channel client: heartbeat, bounded reconnect, frame dispatch.
//!
//! The raw socket lives behind the [`Connector`]/[`PushSocket`] traits so the
//! same loop runs against a real WebSocket transport or a scripted test
//! double. Decoded events are delivered over an mpsc channel; when no
//! connector is available at all, the session falls back to polling.

mod client;
mod error;
mod socket;

pub use client::{PushClient, PushUpdate};
pub use error::PushError;
pub use socket::{Connector, PushSocket};
