use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use instalk_core::{PING, PushEvent};

use crate::error::PushError;
use crate::socket::{Connector, PushSocket};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// What the push loop reports to its consumer: connection lifecycle plus
/// decoded frames.
#[derive(Debug, Clone)]
pub enum PushUpdate {
    Open,
    Closed { reason: String },
    Event(PushEvent),
}

/// Owns the background connection task. Dropping or calling
/// [`PushClient::disconnect`] cancels the reconnect loop; `disconnect`
/// additionally waits for the task so no update can arrive afterwards.
pub struct PushClient {
    event_rx: Option<mpsc::Receiver<PushUpdate>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PushClient {
    pub fn connect<C: Connector>(connector: C, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(connector, token.into(), event_tx, shutdown_rx));
        Self {
            event_rx: Some(event_rx),
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<PushUpdate>> {
        self.event_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Manual disconnect. Resolves only after the connection task has
    /// stopped, so callers may safely clear state right after.
    pub async fn disconnect(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Push channel disconnected");
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run<C: Connector>(
    connector: C,
    token: String,
    event_tx: mpsc::Sender<PushUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match connector.connect(&token).await {
            Ok(socket) => {
                attempts = 0;
                if event_tx.send(PushUpdate::Open).await.is_err() {
                    return;
                }
                let outcome = drive_socket(socket, &event_tx, &mut shutdown_rx).await;
                let reason = match &outcome {
                    None => "manual disconnect".to_string(),
                    Some(PushError::ChannelClosed) => return,
                    Some(e) => e.to_string(),
                };
                debug!(reason = %reason, "Push connection ended");
                if event_tx
                    .send(PushUpdate::Closed { reason })
                    .await
                    .is_err()
                {
                    return;
                }
                if *shutdown_rx.borrow() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Push connect failed");
            }
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            error!(
                attempts = MAX_RECONNECT_ATTEMPTS,
                "Push reconnect attempts exhausted, giving up"
            );
            let reason = PushError::ReconnectExhausted(MAX_RECONNECT_ATTEMPTS).to_string();
            let _ = event_tx.send(PushUpdate::Closed { reason }).await;
            return;
        }

        let delay = RECONNECT_DELAY * attempts;
        debug!(attempt = attempts, delay_secs = delay.as_secs(), "Reconnecting push channel");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

/// Pump one live socket until it drops or shutdown is requested. `None`
/// means a manual disconnect; otherwise the error says why it ended.
async fn drive_socket<S: PushSocket>(
    mut socket: S,
    event_tx: &mpsc::Sender<PushUpdate>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<PushError> {
    let mut heartbeat =
        tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                return None;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = socket.send(PING).await {
                    return Some(PushError::Heartbeat(e));
                }
            }
            frame = socket.recv() => match frame {
                Some(Ok(line)) => match PushEvent::from_line(&line) {
                    Some(event) => {
                        if event_tx.send(PushUpdate::Event(event)).await.is_err() {
                            return Some(PushError::ChannelClosed);
                        }
                    }
                    // PONG heartbeats and unknown frame types land here.
                    None => debug!(frame = %line.trim(), "Ignoring push frame"),
                },
                Some(Err(e)) => return Some(PushError::Read(e)),
                None => return Some(PushError::ServerClosed),
            }
        }
    }
}
