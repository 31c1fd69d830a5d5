// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Client-id keyed session registry.
//!
//! A [`Session`] survives across reconnects of the same client id (MQTT's
//! clean-session semantics aside); the registry's job is purely to hand
//! out the one live [`Session`] for a client id at a time and reject a
//! second concurrent claim on it.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use codec::{Error, ErrorKind, Packet};

/// Outbound packets queued for a connection to write.
pub type PacketSender = mpsc::Sender<Packet>;

/// Durable per-client state: which topic filters it holds (subscription
/// membership itself lives in the [`crate::subscription_tree`], this just
/// tracks which filters this client asked for so they can be listed or
/// reapplied) and, while connected, a sender used to push packets to it.
#[derive(Debug, Default)]
pub struct Session {
    client_id: String,
    filters: Vec<codec::TopicFilter>,
    sender: Option<PacketSender>,
}

impl Session {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn add_filters(&mut self, filters: impl IntoIterator<Item = codec::TopicFilter>) {
        self.filters.extend(filters);
    }

    /// Filters this client has asked for, across every Subscribe it has
    /// sent since its session was created.
    #[must_use]
    pub fn filters(&self) -> &[codec::TopicFilter] {
        &self.filters
    }

    #[must_use]
    pub fn sender(&self) -> Option<&PacketSender> {
        self.sender.as_ref()
    }
}

struct Entry {
    session: Session,
    in_use: bool,
}

/// Maps client ids to their [`Session`], enforcing that a client id is
/// claimed by at most one live connection at a time.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session for `client_id`, creating it if this is the
    /// first time it has connected, and attach `sender` to it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SessionInUse`] if another connection is
    /// currently holding this client id.
    pub fn claim(&self, client_id: &str, sender: PacketSender) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        if let Some(entry) = sessions.get_mut(client_id) {
            if entry.in_use {
                return Err(ErrorKind::SessionInUse.into());
            }
            entry.session.sender = Some(sender);
            entry.in_use = true;
            return Ok(());
        }
        sessions.insert(
            client_id.to_string(),
            Entry {
                session: Session {
                    client_id: client_id.to_string(),
                    filters: Vec::new(),
                    sender: Some(sender),
                },
                in_use: true,
            },
        );
        Ok(())
    }

    /// Record that `client_id` subscribed to `filters`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SessionNotFound`] if the client id has no
    /// claimed session (the connection processor must claim one via
    /// [`Self::claim`] on Connect before subscribing is possible).
    pub fn add_filters(
        &self,
        client_id: &str,
        filters: impl IntoIterator<Item = codec::TopicFilter>,
    ) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        let entry = sessions
            .get_mut(client_id)
            .ok_or(ErrorKind::SessionNotFound)?;
        entry.session.add_filters(filters);
        Ok(())
    }

    /// Release the claim on `client_id`, clearing its sender, but keep
    /// the session (and its recorded filters) around for a future
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SessionNotFound`] if no session is registered
    /// for `client_id`.
    pub fn release(&self, client_id: &str) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        let entry = sessions
            .get_mut(client_id)
            .ok_or(ErrorKind::SessionNotFound)?;
        entry.session.sender = None;
        entry.in_use = false;
        Ok(())
    }

    /// Permanently remove `client_id`'s session.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SessionInUse`] if the session is currently
    /// claimed, or [`ErrorKind::SessionNotFound`] if it does not exist.
    pub fn remove(&self, client_id: &str) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        match sessions.get(client_id) {
            None => Err(ErrorKind::SessionNotFound.into()),
            Some(entry) if entry.in_use => Err(ErrorKind::SessionInUse.into()),
            Some(_) => {
                sessions.remove(client_id);
                Ok(())
            }
        }
    }

    /// The sender currently attached to `client_id`, if it is connected.
    #[must_use]
    pub fn sender(&self, client_id: &str) -> Option<PacketSender> {
        let sessions = self.sessions.lock().expect("session registry lock poisoned");
        sessions
            .get(client_id)
            .and_then(|entry| entry.session.sender.clone())
    }

    /// Filters `client_id` has subscribed to, for listing or reapplying
    /// on a future reconnect. Empty if no session is registered for it.
    #[must_use]
    pub fn filters(&self, client_id: &str) -> Vec<codec::TopicFilter> {
        let sessions = self.sessions.lock().expect("session registry lock poisoned");
        sessions
            .get(client_id)
            .map(|entry| entry.session.filters().to_vec())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.lock().expect("session registry lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> PacketSender {
        tokio::sync::mpsc::channel(1).0
    }

    #[test]
    fn test_claim_creates_session() {
        let registry = SessionRegistry::new();
        registry.claim("client-1", sender()).unwrap();
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_second_claim_of_same_client_id_is_rejected() {
        let registry = SessionRegistry::new();
        registry.claim("client-1", sender()).unwrap();
        let err = registry.claim("client-1", sender()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionInUse);
    }

    #[test]
    fn test_release_allows_reclaim_and_keeps_filters() {
        let registry = SessionRegistry::new();
        registry.claim("client-1", sender()).unwrap();
        registry
            .add_filters("client-1", vec![codec::TopicFilter::new("a/b").unwrap()])
            .unwrap();
        registry.release("client-1").unwrap();
        registry.claim("client-1", sender()).unwrap();
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.filters("client-1"), vec![codec::TopicFilter::new("a/b").unwrap()]);
    }

    #[test]
    fn test_filters_empty_for_unknown_client() {
        let registry = SessionRegistry::new();
        assert!(registry.filters("ghost").is_empty());
    }

    #[test]
    fn test_add_filters_without_session_fails() {
        let registry = SessionRegistry::new();
        let err = registry
            .add_filters("ghost", vec![codec::TopicFilter::new("a/b").unwrap()])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[test]
    fn test_remove_while_claimed_fails() {
        let registry = SessionRegistry::new();
        registry.claim("client-1", sender()).unwrap();
        let err = registry.remove("client-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionInUse);
    }

    #[test]
    fn test_remove_after_release_succeeds() {
        let registry = SessionRegistry::new();
        registry.claim("client-1", sender()).unwrap();
        registry.release("client-1").unwrap();
        registry.remove("client-1").unwrap();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_sender_absent_once_released() {
        let registry = SessionRegistry::new();
        registry.claim("client-1", sender()).unwrap();
        assert!(registry.sender("client-1").is_some());
        registry.release("client-1").unwrap();
        assert!(registry.sender("client-1").is_none());
    }
}
