//! Routing table of authenticated clients.
//!
//! Maps a user ID to the outbound queue of the connection that proved it.
//! A user can be connected once; a newer login replaces the older one, and
//! the older connection's cleanup must not evict its replacement, so every
//! entry carries the connection ID that registered it.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;
use zsm_crypto::UserId;

/// Outbound side of one client connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("client limit reached ({0})")]
    Full(usize),
}

#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<UserId, ClientHandle>,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Register `user`, replacing any previous connection of the same user.
    ///
    /// Returns the replaced handle, if any.
    pub fn register(
        &mut self,
        user: UserId,
        handle: ClientHandle,
    ) -> Result<Option<ClientHandle>, RegistryError> {
        if !self.clients.contains_key(&user) && self.clients.len() >= self.max_clients {
            return Err(RegistryError::Full(self.max_clients));
        }
        Ok(self.clients.insert(user, handle))
    }

    /// Remove `user` if it is still registered by `conn_id`.
    pub fn unregister(&mut self, user: &UserId, conn_id: Uuid) -> bool {
        match self.clients.get(user) {
            Some(handle) if handle.conn_id == conn_id => {
                self.clients.remove(user);
                true
            }
            _ => false,
        }
    }

    /// Outbound queue for `user`.
    pub fn sender(&self, user: &UserId) -> Option<mpsc::Sender<Bytes>> {
        self.clients.get(user).map(|handle| handle.tx.clone())
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.clients.contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zsm_crypto::IdentityKeypair;

    fn handle() -> (ClientHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(4);
        (
            ClientHandle {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ClientRegistry::new(4);
        let user = IdentityKeypair::generate().user_id();
        let (h, _rx) = handle();

        assert!(registry.register(user.clone(), h).unwrap().is_none());
        assert!(registry.contains(&user));
        assert!(registry.sender(&user).is_some());
        assert_eq!(registry.len(), 1);

        let stranger = IdentityKeypair::generate().user_id();
        assert!(registry.sender(&stranger).is_none());
    }

    #[test]
    fn test_capacity() {
        let mut registry = ClientRegistry::new(1);
        let alice = IdentityKeypair::generate().user_id();
        let bob = IdentityKeypair::generate().user_id();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let (h3, _rx3) = handle();

        registry.register(alice.clone(), h1).unwrap();
        assert!(matches!(
            registry.register(bob, h2),
            Err(RegistryError::Full(1))
        ));

        // Re-login of an existing user does not need a free slot.
        assert!(registry.register(alice, h3).unwrap().is_some());
    }

    #[test]
    fn test_stale_unregister_keeps_replacement() {
        let mut registry = ClientRegistry::new(4);
        let alice = IdentityKeypair::generate().user_id();
        let (old, _rx1) = handle();
        let (new, _rx2) = handle();
        let old_id = old.conn_id;
        let new_id = new.conn_id;

        registry.register(alice.clone(), old).unwrap();
        registry.register(alice.clone(), new).unwrap();

        assert!(!registry.unregister(&alice, old_id));
        assert!(registry.contains(&alice));

        assert!(registry.unregister(&alice, new_id));
        assert!(registry.is_empty());
    }
}
