//! Live presence hub for metrics WebSocket clients
//!
//! Each connected client owns an unbounded channel; the socket task
//! drains it and writes frames. The hub lock therefore only guards the
//! client map and is never held across a network write. Broadcasts are
//! staggered over a spread window so a tick does not hit every client
//! at once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

/// Handle identifying one registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

struct Client {
    tx: UnboundedSender<String>,
    label: String,
    user_id: String,
    connected_at: DateTime<Utc>,
}

/// Read-only snapshot of a connected client's identity
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub label: String,
    /// Empty for anonymous visitors
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
}

/// User-centric metrics payload streamed to WebSocket clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsPayload {
    /// Unique authenticated users currently connected
    pub users_online: usize,
    /// Unique users with live sessions but no current connection
    pub users_offline: usize,
    /// Unique anonymous visitors currently connected
    pub anon_recent: usize,
}

#[derive(Serialize)]
struct Envelope {
    r#type: &'static str,
    data: WsPayload,
}

/// Connection registry with staggered broadcast
pub struct Hub {
    clients: Mutex<HashMap<ClientId, Client>>,
    next_id: AtomicU64,
    spread: Duration,
}

impl Hub {
    /// Create a hub; `spread` is the window over which one broadcast's
    /// sends are distributed
    pub fn new(spread: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            spread,
        }
    }

    /// Register a connection; the caller drains the returned receiver
    /// into the socket
    pub fn register(&self, label: String, user_id: String) -> (ClientId, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            tx,
            label,
            user_id,
            connected_at: Utc::now(),
        };
        self.lock().insert(id, client);
        (id, rx)
    }

    /// Unregister a connection
    pub fn remove(&self, id: ClientId) {
        self.lock().remove(&id);
    }

    /// Snapshot of all connected clients' identity info
    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        self.lock()
            .values()
            .map(|c| ClientInfo {
                label: c.label.clone(),
                user_id: c.user_id.clone(),
                connected_at: c.connected_at,
            })
            .collect()
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Send a payload to a single client (initial send on connect)
    pub fn send(&self, id: ClientId, payload: WsPayload) {
        let Some(msg) = encode(payload) else { return };
        let stale = {
            let clients = self.lock();
            match clients.get(&id) {
                Some(c) => c.tx.send(msg).is_err(),
                None => false,
            }
        };
        if stale {
            self.remove(id);
        }
    }

    /// Queue a payload for every client, staggered over the spread window
    pub fn broadcast(self: &Arc<Self>, payload: WsPayload) {
        let Some(msg) = encode(payload) else { return };

        let targets: Vec<ClientId> = self.lock().keys().copied().collect();
        let n = targets.len();
        if n == 0 {
            return;
        }
        if n == 1 {
            self.deliver(targets[0], msg);
            return;
        }

        let gap = self.spread / n as u32;
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            for (i, id) in targets.into_iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(gap).await;
                }
                hub.deliver(id, msg.clone());
            }
        });
    }

    fn deliver(&self, id: ClientId, msg: String) {
        let stale = {
            let clients = self.lock();
            match clients.get(&id) {
                Some(c) => c.tx.send(msg).is_err(),
                // Disconnected before its slot in the spread came up.
                None => false,
            }
        };
        if stale {
            debug!("metrics hub: dropping client with closed channel");
            self.remove(id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, Client>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn encode(payload: WsPayload) -> Option<String> {
    match serde_json::to_string(&Envelope {
        r#type: "metrics",
        data: payload,
    }) {
        Ok(msg) => Some(msg),
        Err(e) => {
            error!(error = %e, "metrics hub: encode payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_remove() {
        let hub = Arc::new(Hub::new(Duration::from_secs(15)));
        assert_eq!(hub.client_count(), 0);

        let (id, _rx) = hub.register("label-1".to_string(), "user-1".to_string());
        assert_eq!(hub.client_count(), 1);

        let clients = hub.connected_clients();
        assert_eq!(clients[0].label, "label-1");
        assert_eq!(clients[0].user_id, "user-1");

        hub.remove(id);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_send_reaches_client() {
        let hub = Arc::new(Hub::new(Duration::from_secs(15)));
        let (id, mut rx) = hub.register("label".to_string(), String::new());

        hub.send(
            id,
            WsPayload {
                users_online: 2,
                users_offline: 1,
                anon_recent: 3,
            },
        );

        let msg = rx.recv().await.expect("message queued");
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["type"], "metrics");
        assert_eq!(value["data"]["usersOnline"], 2);
        assert_eq!(value["data"]["usersOffline"], 1);
        assert_eq!(value["data"]["anonRecent"], 3);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let hub = Arc::new(Hub::new(Duration::from_millis(10)));
        let (_a, mut rx_a) = hub.register("a".to_string(), String::new());
        let (_b, mut rx_b) = hub.register("b".to_string(), String::new());

        hub.broadcast(WsPayload {
            users_online: 1,
            ..Default::default()
        });

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dead_client_is_pruned_on_send() {
        let hub = Arc::new(Hub::new(Duration::from_secs(15)));
        let (id, rx) = hub.register("gone".to_string(), String::new());
        drop(rx);

        hub.send(id, WsPayload::default());
        assert_eq!(hub.client_count(), 0);
    }
}
