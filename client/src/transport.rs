use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use tombola_protocol::Envelope;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection lifecycle and inbound frames, fanned out to every subscriber.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    ConnectError(String),
    Message(Envelope),
}

/// One process-wide event channel connection, shared by any number of room
/// views. Created explicitly and injected where needed; reconnection is its
/// own business, consumers only observe lifecycle events.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    events: broadcast::Sender<TransportEvent>,
    outbound: mpsc::UnboundedSender<Envelope>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Transport {
    /// Opens the connection and keeps it alive until `shutdown`.
    pub fn connect(url: Url) -> Transport {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound, rx_out) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(url, events.clone(), rx_out));
        Transport {
            inner: Arc::new(TransportInner {
                events,
                outbound,
                pump: Mutex::new(Some(pump)),
            }),
        }
    }

    /// Queues a named event for the server. Frames queued while offline are
    /// flushed after the next successful connect.
    pub fn emit(&self, event: &str, data: serde_json::Value) {
        let _ = self.inner.outbound.send(Envelope::new(event, data));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// Releases the connection. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
    }

    /// A transport with no socket behind it, for driving consumers by hand.
    #[cfg(test)]
    pub(crate) fn offline() -> (Transport, mpsc::UnboundedReceiver<Envelope>) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound, rx_out) = mpsc::unbounded_channel();
        let transport = Transport {
            inner: Arc::new(TransportInner {
                events,
                outbound,
                pump: Mutex::new(None),
            }),
        };
        (transport, rx_out)
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, event: TransportEvent) {
        let _ = self.inner.events.send(event);
    }
}

async fn pump(
    url: Url,
    events: broadcast::Sender<TransportEvent>,
    mut rx_out: mpsc::UnboundedReceiver<Envelope>,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut socket, _)) => {
                info!(%url, "event channel connected");
                let _ = events.send(TransportEvent::Connected);
                loop {
                    tokio::select! {
                        Some(out) = rx_out.recv() => {
                            let text = match serde_json::to_string(&out) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(%err, event = %out.event, "dropping unencodable frame");
                                    continue;
                                }
                            };
                            if socket.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        frame = socket.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<Envelope>(&text) {
                                    Ok(envelope) => {
                                        let _ = events.send(TransportEvent::Message(envelope));
                                    }
                                    Err(err) => debug!(%err, "ignoring undecodable frame"),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(%err, "event channel error");
                                break;
                            }
                        },
                    }
                }
                warn!(%url, "event channel disconnected");
                let _ = events.send(TransportEvent::Disconnected);
            }
            Err(err) => {
                warn!(%url, %err, "event channel connect failed");
                let _ = events.send(TransportEvent::ConnectError(err.to_string()));
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
