//! Client Session Registry
//!
//! Tracks live WebSocket connections and which player each one is bound to.
//! Outbound traffic goes through each connection's bounded queue; a full
//! queue drops the message for that client rather than stalling the sender.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::game::bet::PlayerId;

/// Per-process connection identifier.
pub type ConnectionId = u64;

/// One live connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Peer address.
    pub addr: SocketAddr,
    /// Player bound by `auth`.
    pub uid: Option<PlayerId>,
    /// Outbound queue drained by the connection's writer task.
    pub sender: mpsc::Sender<Message>,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct SessionManager {
    next_id: AtomicU64,
    clients: RwLock<BTreeMap<ConnectionId, ClientHandle>>,
}

impl SessionManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its id.
    pub async fn register(&self, addr: SocketAddr, sender: mpsc::Sender<Message>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients.write().await.insert(id, ClientHandle { addr, uid: None, sender });
        id
    }

    /// Bind a connection to a player. Several connections may share a player.
    pub async fn bind_player(&self, id: ConnectionId, uid: &str) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.uid = Some(uid.to_string());
        }
    }

    /// Drop a connection.
    pub async fn unregister(&self, id: ConnectionId) -> Option<ClientHandle> {
        self.clients.write().await.remove(&id)
    }

    /// Queue a text frame for every connection; returns how many accepted it.
    pub async fn broadcast(&self, text: &str) -> usize {
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|client| client.sender.try_send(Message::Text(text.to_string())).is_ok())
            .count()
    }

    /// Queue a text frame for every connection bound to `uid`.
    pub async fn send_to_player(&self, uid: &str, text: &str) -> usize {
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|client| client.uid.as_deref() == Some(uid))
            .filter(|client| client.sender.try_send(Message::Text(text.to_string())).is_ok())
            .count()
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}
