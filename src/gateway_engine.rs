// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event loop owning the registry, plus the push-connection server feeding it.
//!
//! Connections and the measurement session never touch the registry directly:
//! they send [`GatewayEvent`]s and the engine handles one event at a time, so
//! registry mutations are serialized without locks.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::device_registry::Device;
use crate::error::RangingError;
use crate::measurement_session::RegistryView;
use crate::protocol::{OutboundMessage, ProtocolGateway, CONNECTION_ACK};

const ENGINE_EVENT_CHANNEL_BUF_SIZE: usize = 100;
// Pause after an accept failure that is not tied to a single peer, such as
// running out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Requests handled by the engine.
pub enum GatewayEvent {
    /// A text frame received on a connection.
    TextFrame {
        /// Frame payload.
        text: String,
        /// Receives the reply for the sender, if any.
        reply_tx: oneshot::Sender<Option<OutboundMessage>>,
    },
    /// Copy of the registered devices.
    Snapshot(oneshot::Sender<Vec<Device>>),
    /// Current reference readings for a list of ids.
    ReferenceReadings {
        /// Device ids to read.
        ids: Vec<String>,
        /// Receives one entry per id.
        reply_tx: oneshot::Sender<Vec<Option<i32>>>,
    },
    /// Liveness sweep.
    LivenessCheck,
    /// Ends the event loop.
    Stop,
}

/// Single owner of the [`ProtocolGateway`].
pub struct GatewayEngine {
    events_rx: mpsc::Receiver<GatewayEvent>,
    gateway: ProtocolGateway,
}

impl GatewayEngine {
    /// Creates an engine and the handle used to reach it.
    pub fn new() -> (GatewayEngine, GatewayHandle) {
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_CHANNEL_BUF_SIZE);
        (
            GatewayEngine {
                events_rx,
                gateway: ProtocolGateway::new(),
            },
            GatewayHandle { events_tx },
        )
    }

    /// Processes events until [`GatewayEvent::Stop`] or until every handle is gone.
    pub async fn run(&mut self) {
        info!("Gateway engine starts.");
        while let Some(event) = self.events_rx.recv().await {
            match event {
                GatewayEvent::TextFrame { text, reply_tx } => {
                    let reply = self.gateway.on_text_frame(&text);
                    if reply_tx.send(reply).is_err() {
                        debug!("Connection went away before its reply was ready.");
                    }
                }
                GatewayEvent::Snapshot(reply_tx) => {
                    let _ = reply_tx.send(self.gateway.registry().snapshot());
                }
                GatewayEvent::ReferenceReadings { ids, reply_tx } => {
                    let _ = reply_tx.send(self.gateway.registry().reference_readings(&ids));
                }
                GatewayEvent::LivenessCheck => {
                    for id in self.gateway.registry_mut().sweep_stale() {
                        warn!("Device {} sent nothing since the last liveness check.", id);
                    }
                }
                GatewayEvent::Stop => {
                    info!("Gateway engine stopped.");
                    break;
                }
            }
        }
    }
}

/// Cloneable sender side of the engine.
#[derive(Clone)]
pub struct GatewayHandle {
    events_tx: mpsc::Sender<GatewayEvent>,
}

impl GatewayHandle {
    async fn send(&self, event: GatewayEvent) -> Result<(), RangingError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| RangingError::GatewayUnavailable)
    }

    async fn request<T>(
        &self,
        make_event: impl FnOnce(oneshot::Sender<T>) -> GatewayEvent,
    ) -> Result<T, RangingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make_event(reply_tx)).await?;
        reply_rx.await.map_err(|_| RangingError::GatewayUnavailable)
    }

    /// Hands a received text frame to the engine and waits for its reply.
    pub async fn submit_frame(&self, text: String) -> Result<Option<OutboundMessage>, RangingError> {
        self.request(|reply_tx| GatewayEvent::TextFrame { text, reply_tx })
            .await
    }

    /// Triggers a liveness sweep.
    pub async fn check_liveness(&self) -> Result<(), RangingError> {
        self.send(GatewayEvent::LivenessCheck).await
    }

    /// Stops the engine.
    pub async fn stop(&self) -> Result<(), RangingError> {
        self.send(GatewayEvent::Stop).await
    }
}

#[async_trait]
impl RegistryView for GatewayHandle {
    async fn snapshot(&self) -> Result<Vec<Device>, RangingError> {
        self.request(GatewayEvent::Snapshot).await
    }

    async fn reference_readings(&self, ids: &[String]) -> Result<Vec<Option<i32>>, RangingError> {
        let ids = ids.to_vec();
        self.request(|reply_tx| GatewayEvent::ReferenceReadings { ids, reply_tx })
            .await
    }
}

/// Sends a liveness sweep every `period` until the engine goes away.
pub async fn run_liveness_timer(handle: GatewayHandle, period: Duration) -> Result<(), RangingError> {
    let mut ticker = time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        handle.check_liveness().await?;
    }
}

fn socket_error(err: tungstenite::Error) -> RangingError {
    RangingError::Io(err.to_string())
}

/// Delay before the next accept after `err`. Failures caused by one peer are
/// retried at once.
fn accept_retry_delay(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_RETRY_DELAY,
    }
}

/// Accepts push connections forever, one task per connection. A failed accept
/// is logged and the listener keeps going.
pub async fn serve(listener: TcpListener, handle: GatewayHandle) -> Result<(), RangingError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                let delay = accept_retry_delay(&err);
                warn!("Accepting a connection failed: {}", err);
                if !delay.is_zero() {
                    time::sleep(delay).await;
                }
                continue;
            }
        };
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, handle).await {
                error!("Connection {} failed: {}", peer, err);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handle: GatewayHandle,
) -> Result<(), RangingError> {
    let socket = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(socket_error)?;
    info!("Connection {} opened.", peer);
    let (mut sink, mut source) = socket.split();
    sink.send(Message::Text(CONNECTION_ACK.to_string()))
        .await
        .map_err(socket_error)?;

    while let Some(frame) = source.next().await {
        let text = match frame.map_err(socket_error)? {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non UTF-8 frame from {}.", peer);
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };
        if let Some(reply) = handle.submit_frame(text).await? {
            sink.send(Message::Text(reply.to_json()?))
                .await
                .map_err(socket_error)?;
        }
    }
    info!("Connection {} closed.", peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_failures_retry_at_once() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
        ] {
            assert_eq!(accept_retry_delay(&io::Error::from(kind)), Duration::ZERO);
        }
    }

    #[test]
    fn test_resource_failures_back_off() {
        // EMFILE surfaces as an uncategorized OS error.
        assert_eq!(
            accept_retry_delay(&io::Error::from_raw_os_error(24)),
            ACCEPT_RETRY_DELAY
        );
        assert_eq!(
            accept_retry_delay(&io::Error::from(io::ErrorKind::OutOfMemory)),
            ACCEPT_RETRY_DELAY
        );
    }
}
