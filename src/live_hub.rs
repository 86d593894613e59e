// src/live_hub.rs

use actix::prelude::*;
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;

use crate::models::Notification;

/// Serialized event text delivered to one WebSocket session.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct LiveText(pub String);

/// Events pushed to the dashboards in place of polling.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Notification {
        notification: Notification,
    },
    ComplaintUpdated {
        complaint_id: String,
        title: String,
        status: String,
        deleted: bool,
    },
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<LiveText>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<LiveText>,
}

/// Deliver one event to every open session of each listed user.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Push {
    pub user_ids: Vec<String>,
    pub event: LiveEvent,
}

#[derive(Default)]
pub struct LiveHub {
    // A user may have several tabs open.
    sessions: HashMap<String, Vec<Recipient<LiveText>>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn deliver(&self, user_id: &str, text: &str) {
        if let Some(addrs) = self.sessions.get(user_id) {
            for addr in addrs {
                addr.do_send(LiveText(text.to_string()));
            }
        }
    }
}

impl Actor for LiveHub {
    type Context = Context<Self>;
}

impl Handler<Connect> for LiveHub {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("User {} connected (WS)", msg.user_id);
        self.sessions.entry(msg.user_id).or_default().push(msg.addr);
    }
}

impl Handler<Disconnect> for LiveHub {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("User {} disconnected (WS)", msg.user_id);
        if let Some(addrs) = self.sessions.get_mut(&msg.user_id) {
            addrs.retain(|a| a != &msg.addr);
            if addrs.is_empty() {
                self.sessions.remove(&msg.user_id);
            }
        }
    }
}

impl Handler<Push> for LiveHub {
    type Result = ();

    fn handle(&mut self, msg: Push, _: &mut Context<Self>) {
        let text = match serde_json::to_string(&msg.event) {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to encode live event: {}", e);
                return;
            }
        };
        debug!("Pushing live event to {} user(s)", msg.user_ids.len());
        for user_id in &msg.user_ids {
            self.deliver(user_id, &text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Collector {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<LiveText> for Collector {
        type Result = ();

        fn handle(&mut self, msg: LiveText, _: &mut Context<Self>) {
            self.seen.lock().unwrap().push(msg.0);
        }
    }

    #[derive(Message)]
    #[rtype(result = "()")]
    struct Flush;

    impl Handler<Flush> for Collector {
        type Result = ();

        fn handle(&mut self, _: Flush, _: &mut Context<Self>) {}
    }

    #[derive(Message)]
    #[rtype(result = "usize")]
    struct SessionCount {
        user_id: String,
    }

    impl Handler<SessionCount> for LiveHub {
        type Result = usize;

        fn handle(&mut self, msg: SessionCount, _: &mut Context<Self>) -> usize {
            self.sessions.get(&msg.user_id).map_or(0, Vec::len)
        }
    }

    fn complaint_event() -> LiveEvent {
        LiveEvent::ComplaintUpdated {
            complaint_id: "c1".into(),
            title: "Leaking tap".into(),
            status: "in progress".into(),
            deleted: false,
        }
    }

    #[actix_web::test]
    async fn pushes_only_to_listed_users() {
        let hub = LiveHub::new().start();
        let alice_seen = Arc::new(Mutex::new(Vec::new()));
        let bob_seen = Arc::new(Mutex::new(Vec::new()));
        let alice = Collector { seen: alice_seen.clone() }.start();
        let bob = Collector { seen: bob_seen.clone() }.start();

        hub.send(Connect { user_id: "alice".into(), addr: alice.clone().recipient() }).await.unwrap();
        hub.send(Connect { user_id: "bob".into(), addr: bob.clone().recipient() }).await.unwrap();
        hub.send(Push { user_ids: vec!["alice".into()], event: complaint_event() }).await.unwrap();
        alice.send(Flush).await.unwrap();
        bob.send(Flush).await.unwrap();

        let alice_seen = alice_seen.lock().unwrap();
        assert_eq!(alice_seen.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&alice_seen[0]).unwrap();
        assert_eq!(json["type"], "complaint_updated");
        assert_eq!(json["status"], "in progress");
        assert!(bob_seen.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn disconnect_removes_only_that_session() {
        let hub = LiveHub::new().start();
        let first = Collector { seen: Arc::new(Mutex::new(Vec::new())) }.start();
        let second = Collector { seen: Arc::new(Mutex::new(Vec::new())) }.start();

        hub.send(Connect { user_id: "u".into(), addr: first.clone().recipient() }).await.unwrap();
        hub.send(Connect { user_id: "u".into(), addr: second.clone().recipient() }).await.unwrap();
        assert_eq!(hub.send(SessionCount { user_id: "u".into() }).await.unwrap(), 2);

        hub.send(Disconnect { user_id: "u".into(), addr: first.recipient() }).await.unwrap();
        assert_eq!(hub.send(SessionCount { user_id: "u".into() }).await.unwrap(), 1);

        hub.send(Disconnect { user_id: "u".into(), addr: second.recipient() }).await.unwrap();
        assert_eq!(hub.send(SessionCount { user_id: "u".into() }).await.unwrap(), 0);
    }
}
