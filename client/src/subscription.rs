use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use tombola_protocol::{
    card_assigned_event, card_updated_event, JoinRoomPayload, ParticipantId, RoomCode, ServerEvent,
    EVENT_BINGO_INVALID, EVENT_BINGO_VALIDATED, EVENT_BINGO_WON, EVENT_GAME_STARTED,
    EVENT_JOIN_ROOM, EVENT_NUMBER_DRAWN,
};

use crate::transport::{Transport, TransportEvent};

/// The one live set of event registrations for a room view. `start` always
/// tears down the previous set first, so remounts and reconnects never end
/// up with two handlers for the same event name.
pub struct Subscriptions {
    transport: Transport,
    forward: mpsc::UnboundedSender<ServerEvent>,
    live: Option<LiveSet>,
}

struct LiveSet {
    active: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl Subscriptions {
    pub fn new(transport: Transport, forward: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Subscriptions {
            transport,
            forward,
            live: None,
        }
    }

    /// Announces presence on the channel and registers the room-wide plus
    /// identity-scoped handlers. Any previous registration is stopped first.
    pub fn start(&mut self, code: &RoomCode, identity: &ParticipantId) {
        self.stop();

        let registered: HashSet<String> = [
            EVENT_GAME_STARTED.to_string(),
            EVENT_NUMBER_DRAWN.to_string(),
            EVENT_BINGO_WON.to_string(),
            EVENT_BINGO_VALIDATED.to_string(),
            EVENT_BINGO_INVALID.to_string(),
            card_assigned_event(identity),
            card_updated_event(identity),
        ]
        .into();

        // Subscribe before announcing so nothing between the two is missed.
        let rx = self.transport.subscribe();
        announce(&self.transport, code, identity);

        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(dispatch(
            rx,
            self.transport.clone(),
            code.clone(),
            identity.clone(),
            registered,
            self.forward.clone(),
            active.clone(),
        ));
        self.live = Some(LiveSet { active, task });
    }

    /// Removes every handler registered by `start`. Idempotent; nothing is
    /// forwarded once this returns.
    pub fn stop(&mut self) {
        if let Some(live) = self.live.take() {
            live.active.store(false, Ordering::SeqCst);
            live.task.abort();
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.stop();
    }
}

fn announce(transport: &Transport, code: &RoomCode, identity: &ParticipantId) {
    let payload = JoinRoomPayload {
        room_code: code.clone(),
        visitor_id: identity.clone(),
    };
    match serde_json::to_value(&payload) {
        Ok(data) => transport.emit(EVENT_JOIN_ROOM, data),
        Err(err) => warn!(%err, "failed to encode join announcement"),
    }
}

async fn dispatch(
    mut rx: broadcast::Receiver<TransportEvent>,
    transport: Transport,
    code: RoomCode,
    identity: ParticipantId,
    registered: HashSet<String>,
    forward: mpsc::UnboundedSender<ServerEvent>,
    active: Arc<AtomicBool>,
) {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::Connected) => {
                // Covers reconnection after network loss.
                announce(&transport, &code, &identity);
            }
            Ok(TransportEvent::Disconnected) => {
                warn!(room = %code, "event channel lost; transport will reconnect");
            }
            Ok(TransportEvent::ConnectError(err)) => {
                warn!(room = %code, %err, "event channel connect error");
            }
            Ok(TransportEvent::Message(envelope)) => {
                if !registered.contains(&envelope.event) {
                    continue;
                }
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                match ServerEvent::parse(&envelope.event, envelope.data, &identity) {
                    Ok(Some(event)) => {
                        if forward.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(event = %envelope.event, %err, "discarding malformed payload")
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // The next snapshot reload re-establishes full truth.
                warn!(room = %code, skipped, "event channel lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(room = %code, "transport closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tombola_protocol::Envelope;

    fn number_drawn_envelope() -> Envelope {
        Envelope::new(
            EVENT_NUMBER_DRAWN,
            json!({ "number": 7, "drawnNumbers": [7] }),
        )
    }

    async fn recv_one(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Option<ServerEvent> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn repeated_start_keeps_a_single_handler_set() {
        let (transport, mut outbound) = Transport::offline();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subs = Subscriptions::new(transport.clone(), tx);

        let code = RoomCode::new("ABC123");
        let me = ParticipantId::from("p1");
        subs.start(&code, &me);
        subs.start(&code, &me);
        subs.start(&code, &me);

        // Each start re-announces presence.
        for _ in 0..3 {
            let frame = outbound.recv().await.expect("join announcement");
            assert_eq!(frame.event, EVENT_JOIN_ROOM);
        }

        transport.inject(TransportEvent::Message(number_drawn_envelope()));

        // Exactly one reduction-worthy event, not three.
        assert!(matches!(
            recv_one(&mut rx).await,
            Some(ServerEvent::NumberDrawn { number: 7, .. })
        ));
        assert!(recv_one(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn stop_silences_the_handler_set() {
        let (transport, _outbound) = Transport::offline();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subs = Subscriptions::new(transport.clone(), tx);

        let code = RoomCode::new("ABC123");
        let me = ParticipantId::from("p1");
        subs.start(&code, &me);
        subs.stop();
        subs.stop();

        transport.inject(TransportEvent::Message(number_drawn_envelope()));
        assert!(recv_one(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn reconnect_reannounces_presence() {
        let (transport, mut outbound) = Transport::offline();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut subs = Subscriptions::new(transport.clone(), tx);

        let code = RoomCode::new("ABC123");
        let me = ParticipantId::from("p1");
        subs.start(&code, &me);
        assert_eq!(outbound.recv().await.unwrap().event, EVENT_JOIN_ROOM);

        transport.inject(TransportEvent::Connected);
        let frame = tokio::time::timeout(Duration::from_millis(200), outbound.recv())
            .await
            .expect("re-announcement")
            .unwrap();
        assert_eq!(frame.event, EVENT_JOIN_ROOM);
    }

    #[tokio::test]
    async fn unregistered_events_are_not_forwarded() {
        let (transport, _outbound) = Transport::offline();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subs = Subscriptions::new(transport.clone(), tx);

        subs.start(&RoomCode::new("ABC123"), &ParticipantId::from("p1"));

        // Another participant's card assignment is not in our handler set.
        transport.inject(TransportEvent::Message(Envelope::new(
            "card-assigned-p2",
            json!({}),
        )));
        assert!(recv_one(&mut rx).await.is_none());
    }
}
