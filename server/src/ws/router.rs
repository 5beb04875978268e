//! Point-to-point dispatch of relay events.
//!
//! The router never holds the registry lock while serializing or writing:
//! `lookup` hands back a cloned handle and writes go through that handle's
//! queue. Every failure here is soft and contained to the event at hand.

use super::protocol::{Frame, RoutedEvent, OFFLINE_MESSAGE};
use super::registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    RecipientOffline,
    InvalidEvent,
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Validate a decoded inbound frame and dispatch it as coming from `sender`.
    ///
    /// `origin` is the sender's own connection when the frame arrived over the
    /// socket; it receives the chat echo and any `call-error`.
    pub fn route(
        &self,
        sender: &str,
        frame: Frame,
        origin: Option<&ConnectionHandle>,
    ) -> RouteOutcome {
        match RoutedEvent::from_frame(sender, frame) {
            Ok(event) => self.dispatch(&event, origin),
            Err(err) => {
                tracing::debug!(identity = %sender, error = %err, "Dropping invalid event");
                RouteOutcome::InvalidEvent
            }
        }
    }

    /// Deliver an already validated event.
    ///
    /// Without an `origin`, the sender's side effects (echo, `call-error`) go to
    /// whatever connection the registry currently holds for `event.from`.
    pub fn dispatch(&self, event: &RoutedEvent, origin: Option<&ConnectionHandle>) -> RouteOutcome {
        let Some(written) = self.write_to_recipient(event) else {
            return RouteOutcome::InvalidEvent;
        };

        let sender_handle = origin
            .cloned()
            .or_else(|| self.registry.lookup(&event.from));
        let Some(sender_handle) = sender_handle else {
            return written.outcome;
        };

        let delivered = written.outcome == RouteOutcome::Delivered;
        if event.is_call_signal() {
            if !delivered {
                send_call_error(&sender_handle, OFFLINE_MESSAGE);
            }
        } else {
            // A note to self already landed on this connection.
            let already_written = delivered
                && written
                    .recipient
                    .as_ref()
                    .is_some_and(|handle| handle.same_connection(&sender_handle));
            if !already_written && sender_handle.send_text(written.payload).is_err() {
                tracing::debug!(identity = %event.from, "Sender gone before echo");
            }
        }

        written.outcome
    }

    /// Write `event` to its recipient only. The sender gets no echo and no
    /// `call-error`; the caller reports the outcome itself.
    pub fn deliver(&self, event: &RoutedEvent) -> RouteOutcome {
        self.write_to_recipient(event)
            .map(|written| written.outcome)
            .unwrap_or(RouteOutcome::InvalidEvent)
    }

    fn write_to_recipient(&self, event: &RoutedEvent) -> Option<Written> {
        if event.to.is_empty() || event.from.is_empty() {
            return None;
        }

        let payload = match event.to_frame().to_json() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize relay event");
                return None;
            }
        };

        let recipient = self.registry.lookup(&event.to);
        let delivered = recipient
            .as_ref()
            .is_some_and(|handle| handle.send_text(payload.clone()).is_ok());

        let outcome = if delivered {
            RouteOutcome::Delivered
        } else {
            tracing::debug!(
                from = %event.from,
                to = %event.to,
                kind = event.kind_name(),
                "Recipient offline"
            );
            RouteOutcome::RecipientOffline
        };

        Some(Written {
            payload,
            recipient,
            outcome,
        })
    }
}

struct Written {
    payload: String,
    recipient: Option<ConnectionHandle>,
    outcome: RouteOutcome,
}

fn send_call_error(handle: &ConnectionHandle, message: &str) {
    match Frame::call_error(message).to_json() {
        Ok(json) => {
            let _ = handle.send_text(json);
        }
        Err(err) => tracing::warn!(error = %err, "Failed to serialize call-error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    use crate::ws::protocol::CallType;

    struct Peer {
        handle: ConnectionHandle,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Peer {
        fn connect(registry: &ConnectionRegistry, identity: &str) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = ConnectionHandle::new(tx);
            registry.register(identity, handle.clone());
            Self { handle, rx }
        }

        fn frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                match msg {
                    Message::Text(text) => out.push(serde_json::from_str(text.as_str()).unwrap()),
                    other => panic!("unexpected frame {other:?}"),
                }
            }
            out
        }
    }

    fn frame(value: Value) -> Frame {
        serde_json::from_value(value).unwrap()
    }

    fn setup() -> (ConnectionRegistry, MessageRouter) {
        let registry = ConnectionRegistry::new();
        let router = MessageRouter::new(registry.clone());
        (registry, router)
    }

    #[test]
    fn message_reaches_recipient_and_echoes_to_sender() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");
        let mut bob = Peer::connect(&registry, "bob");

        let outcome = router.route(
            "alice",
            frame(json!({"type": "message", "to": "bob", "text": "hi"})),
            Some(&alice.handle),
        );

        let expected = json!({"type": "message", "from": "alice", "to": "bob", "text": "hi"});
        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(bob.frames(), vec![expected.clone()]);
        assert_eq!(alice.frames(), vec![expected]);
    }

    #[test]
    fn message_to_offline_user_still_echoes() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");

        let outcome = router.route(
            "alice",
            frame(json!({"type": "message", "to": "bob", "text": "anyone?"})),
            Some(&alice.handle),
        );

        assert_eq!(outcome, RouteOutcome::RecipientOffline);
        let frames = alice.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "message");
        assert_eq!(frames[0]["from"], "alice");
    }

    #[test]
    fn call_offer_to_offline_user_returns_call_error_to_sender() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");

        let outcome = router.route(
            "alice",
            frame(json!({"type": "call", "to": "carol", "callType": "voice", "sdp": "v=0"})),
            Some(&alice.handle),
        );

        assert_eq!(outcome, RouteOutcome::RecipientOffline);
        assert_eq!(
            alice.frames(),
            vec![json!({"type": "call-error", "message": OFFLINE_MESSAGE})]
        );
        assert!(registry.lookup("carol").is_none());
    }

    #[test]
    fn call_offer_is_forwarded_without_echo() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");
        let mut bob = Peer::connect(&registry, "bob");

        let outcome = router.route(
            "alice",
            frame(json!({"type": "call", "from": "mallory", "to": "bob", "callType": "video", "sdp": "v=0"})),
            Some(&alice.handle),
        );

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(
            bob.frames(),
            vec![json!({"type": "call", "from": "alice", "to": "bob", "callType": "video", "sdp": "v=0"})]
        );
        assert!(alice.frames().is_empty());
    }

    #[test]
    fn missing_recipient_is_invalid_and_writes_nothing() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");
        let mut bob = Peer::connect(&registry, "bob");

        for value in [
            json!({"type": "message", "text": "hi"}),
            json!({"type": "message", "to": "", "text": "hi"}),
            json!({"type": "call", "callType": "voice", "sdp": "v=0"}),
            json!({"type": "call-end"}),
        ] {
            let outcome = router.route("alice", frame(value), Some(&alice.handle));
            assert_eq!(outcome, RouteOutcome::InvalidEvent);
        }

        assert!(alice.frames().is_empty());
        assert!(bob.frames().is_empty());
    }

    #[test]
    fn write_to_closed_recipient_is_treated_as_offline() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");
        let bob = Peer::connect(&registry, "bob");
        drop(bob.rx);

        let outcome = router.route(
            "alice",
            frame(json!({"type": "call-end", "to": "bob"})),
            Some(&alice.handle),
        );

        assert_eq!(outcome, RouteOutcome::RecipientOffline);
        assert_eq!(alice.frames()[0]["type"], "call-error");
    }

    #[test]
    fn dispatch_without_origin_echoes_through_registry() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");
        let mut bob = Peer::connect(&registry, "bob");

        let event = RoutedEvent::message("alice", "bob", "from rest", None);
        assert_eq!(router.dispatch(&event, None), RouteOutcome::Delivered);

        assert_eq!(bob.frames().len(), 1);
        assert_eq!(alice.frames().len(), 1);
    }

    #[test]
    fn deliver_to_offline_user_sends_nothing_to_sender() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");

        let offer = RoutedEvent::call_offer("alice", "bob", CallType::Voice, "v=0");
        assert_eq!(router.deliver(&offer), RouteOutcome::RecipientOffline);
        assert!(alice.frames().is_empty());
    }

    #[test]
    fn deliver_reaches_recipient_without_echo() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");
        let mut bob = Peer::connect(&registry, "bob");

        let offer = RoutedEvent::call_offer("alice", "bob", CallType::Video, "v=0");
        assert_eq!(router.deliver(&offer), RouteOutcome::Delivered);
        assert_eq!(bob.frames()[0]["callType"], "video");
        assert!(alice.frames().is_empty());
    }

    #[test]
    fn message_to_self_is_written_once() {
        let (registry, router) = setup();
        let mut alice = Peer::connect(&registry, "alice");

        let outcome = router.route(
            "alice",
            frame(json!({"type": "message", "to": "alice", "text": "note"})),
            Some(&alice.handle),
        );

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(alice.frames().len(), 1);
    }

    #[test]
    fn events_from_one_sender_arrive_in_order() {
        let (registry, router) = setup();
        let alice = Peer::connect(&registry, "alice");
        let mut bob = Peer::connect(&registry, "bob");

        for i in 0..20 {
            router.route(
                "alice",
                frame(json!({"type": "message", "to": "bob", "text": format!("m{i}")})),
                Some(&alice.handle),
            );
        }

        let texts: Vec<String> = bob
            .frames()
            .into_iter()
            .map(|f| f["text"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn connect_send_disconnect_cycles_deliver_each_message_once() {
        const SENDERS: usize = 16;
        const CYCLES: usize = 40;

        let (registry, router) = setup();
        let mut hub = Peer::connect(&registry, "hub");

        let mut tasks = Vec::new();
        for i in 0..SENDERS {
            let registry = registry.clone();
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                let identity = format!("user-{i}");
                let mut echoes = 0;
                for cycle in 0..CYCLES {
                    let mut peer = Peer::connect(&registry, &identity);
                    let outcome = router.route(
                        &identity,
                        frame(json!({"type": "message", "to": "hub", "text": format!("{identity}/{cycle}")})),
                        Some(&peer.handle),
                    );
                    assert_eq!(outcome, RouteOutcome::Delivered);
                    echoes += peer.frames().len();
                    assert!(registry.deregister(&identity, &peer.handle));
                    tokio::task::yield_now().await;
                }
                echoes
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), CYCLES);
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        for f in hub.frames() {
            *seen.entry(f["text"].as_str().unwrap().to_string()).or_default() += 1;
        }
        assert_eq!(seen.len(), SENDERS * CYCLES);
        assert!(seen.values().all(|&count| count == 1));

        assert_eq!(registry.size(), 1);
        assert!(registry.lookup("hub").unwrap().same_connection(&hub.handle));
    }
}
