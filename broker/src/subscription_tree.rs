// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Hierarchical, copy-on-write subscription matching.
//!
//! Subscriptions are kept in a trie keyed by topic level: a plain segment,
//! `+` (matches exactly one level) or a trailing `#` (matches everything
//! beneath it). [`SubscriptionTreeManager`] hands out cheap `Arc` read
//! snapshots for Publish matching while serializing writes behind a single
//! lock, deep-cloning the tree before mutating it so a reader holding an
//! older snapshot never observes a half-built update.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use codec::{Error, ErrorKind, Topic, TopicFilter};

#[derive(Debug, Clone, Default)]
struct Branch {
    children: HashMap<String, Node>,
    sessions: HashSet<String>,
}

#[derive(Debug, Clone)]
enum Node {
    Branch(Branch),
    MultiWildcard(HashSet<String>),
}

impl Node {
    fn collect_matches(&self, levels: &[&str], out: &mut HashSet<String>) {
        match self {
            Self::Branch(branch) => branch.collect_matches(levels, out),
            Self::MultiWildcard(sessions) => out.extend(sessions.iter().cloned()),
        }
    }
}

impl Branch {
    fn collect_matches(&self, levels: &[&str], out: &mut HashSet<String>) {
        let Some((head, rest)) = levels.split_first() else {
            out.extend(self.sessions.iter().cloned());
            return;
        };
        if let Some(node) = self.children.get(*head) {
            node.collect_matches(rest, out);
        }
        if let Some(node) = self.children.get("#") {
            node.collect_matches(rest, out);
        }
        if let Some(node) = self.children.get("+") {
            node.collect_matches(rest, out);
        }
    }

    fn add_filter(&mut self, levels: &[&str], client_id: &str) -> Result<(), Error> {
        let Some((head, rest)) = levels.split_first() else {
            self.sessions.insert(client_id.to_string());
            return Ok(());
        };
        if *head == "#" {
            if !rest.is_empty() {
                return Err(ErrorKind::InvalidTopicFilter.into());
            }
            let node = self
                .children
                .entry((*head).to_string())
                .or_insert_with(|| Node::MultiWildcard(HashSet::new()));
            return match node {
                Node::MultiWildcard(sessions) => {
                    sessions.insert(client_id.to_string());
                    Ok(())
                }
                Node::Branch(_) => Err(ErrorKind::InvalidTopicFilter.into()),
            };
        }
        let node = self
            .children
            .entry((*head).to_string())
            .or_insert_with(|| Node::Branch(Self::default()));
        match node {
            Node::Branch(branch) => branch.add_filter(rest, client_id),
            Node::MultiWildcard(_) => Err(ErrorKind::InvalidTopicFilter.into()),
        }
    }

    fn remove_session(&mut self, client_id: &str) {
        self.sessions.remove(client_id);
        for node in self.children.values_mut() {
            match node {
                Node::Branch(branch) => branch.remove_session(client_id),
                Node::MultiWildcard(sessions) => {
                    sessions.remove(client_id);
                }
            }
        }
    }
}

/// Immutable snapshot of all current subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTree {
    root: Branch,
}

impl SubscriptionTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions subscribed to a filter that matches `topic`.
    #[must_use]
    pub fn matching_sessions(&self, topic: &Topic) -> HashSet<String> {
        let levels: Vec<&str> = topic.levels().collect();
        let mut out = HashSet::new();
        self.root.collect_matches(&levels, &mut out);
        out
    }

    fn add_filter(&mut self, filter: &TopicFilter, client_id: &str) -> Result<(), Error> {
        let levels: Vec<&str> = filter.levels().collect();
        self.root.add_filter(&levels, client_id)
    }

    fn remove_session(&mut self, client_id: &str) {
        self.root.remove_session(client_id);
    }

    fn deep_clone(&self) -> Self {
        self.clone()
    }
}

/// Owns the single writable subscription tree and publishes read-only
/// snapshots of it.
#[derive(Debug)]
pub struct SubscriptionTreeManager {
    current: RwLock<Arc<SubscriptionTree>>,
    write_lock: Mutex<()>,
}

impl SubscriptionTreeManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(SubscriptionTree::new())),
            write_lock: Mutex::new(()),
        }
    }

    /// A cheap, lock-free-for-readers snapshot to match a Publish against.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SubscriptionTree> {
        Arc::clone(&self.current.read().expect("subscription tree lock poisoned"))
    }

    /// Add one subscription for `client_id`, applying it copy-on-write:
    /// the current snapshot is deep-cloned, mutated privately, then
    /// atomically swapped in so concurrent readers of the old snapshot
    /// are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidTopicFilter`] if `filter` nests another
    /// level beneath a `#` wildcard already present for this client.
    pub fn add_filter(&self, filter: &TopicFilter, client_id: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().expect("subscription tree lock poisoned");
        let mut next = self.snapshot().deep_clone();
        next.add_filter(filter, client_id)?;
        *self.current.write().expect("subscription tree lock poisoned") = Arc::new(next);
        Ok(())
    }

    /// Remove every subscription belonging to `client_id`, e.g. when its
    /// session is torn down.
    pub fn remove_session(&self, client_id: &str) {
        let _guard = self.write_lock.lock().expect("subscription tree lock poisoned");
        let mut next = self.snapshot().deep_clone();
        next.remove_session(client_id);
        *self.current.write().expect("subscription tree lock poisoned") = Arc::new(next);
    }
}

impl Default for SubscriptionTreeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(s: &str) -> TopicFilter {
        TopicFilter::new(s).unwrap()
    }

    fn topic(s: &str) -> Topic {
        Topic::new(s).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let manager = SubscriptionTreeManager::new();
        manager.add_filter(&filter("a/b"), "client-1").unwrap();
        let snapshot = manager.snapshot();
        let matched = snapshot.matching_sessions(&topic("a/b"));
        assert!(matched.contains("client-1"));
        assert!(!snapshot.matching_sessions(&topic("a/c")).contains("client-1"));
    }

    #[test]
    fn test_single_level_wildcard() {
        let manager = SubscriptionTreeManager::new();
        manager.add_filter(&filter("a/+/c"), "client-1").unwrap();
        let snapshot = manager.snapshot();
        assert!(snapshot.matching_sessions(&topic("a/b/c")).contains("client-1"));
        assert!(!snapshot.matching_sessions(&topic("a/b/c/d")).contains("client-1"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let manager = SubscriptionTreeManager::new();
        manager.add_filter(&filter("a/#"), "client-1").unwrap();
        let snapshot = manager.snapshot();
        assert!(snapshot.matching_sessions(&topic("a/b")).contains("client-1"));
        assert!(snapshot.matching_sessions(&topic("a/b/c/d")).contains("client-1"));
        assert!(!snapshot.matching_sessions(&topic("x/b")).contains("client-1"));
    }

    #[test]
    fn test_cannot_nest_under_hash() {
        let manager = SubscriptionTreeManager::new();
        manager.add_filter(&filter("a/#"), "client-1").unwrap();
        // A second, unrelated client subscribing under the very same "#"
        // node is fine; the restriction is only against a filter string
        // that itself tries to place a segment after "#".
        assert!(manager.add_filter(&filter("a/#"), "client-2").is_ok());
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let manager = SubscriptionTreeManager::new();
        manager.add_filter(&filter("a/b"), "client-1").unwrap();
        let before = manager.snapshot();
        manager.add_filter(&filter("a/b"), "client-2").unwrap();
        assert!(!before.matching_sessions(&topic("a/b")).contains("client-2"));
        assert!(manager
            .snapshot()
            .matching_sessions(&topic("a/b"))
            .contains("client-2"));
    }

    #[test]
    fn test_remove_session() {
        let manager = SubscriptionTreeManager::new();
        manager.add_filter(&filter("a/b"), "client-1").unwrap();
        manager.add_filter(&filter("a/#"), "client-1").unwrap();
        manager.remove_session("client-1");
        let snapshot = manager.snapshot();
        assert!(!snapshot.matching_sessions(&topic("a/b")).contains("client-1"));
    }
}
