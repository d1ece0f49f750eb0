use std::sync::atomic::{AtomicU64, Ordering};

use ahash::HashSet;
use itertools::Itertools;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info};

use fleet_core::host::{ConnectionComponent, ConnectorComponent};

/// Remote addresses the connector refuses.
#[derive(Debug, Default)]
pub struct Blacklist {
    ids: RwLock<HashSet<String>>,
}

impl Blacklist {
    pub fn extend<I, S>(&self, ids: I) where I: IntoIterator<Item=S>, S: Into<String> {
        let mut guard = self.ids.write();
        guard.extend(ids.into_iter().map(Into::into));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.read().contains(id)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.read().iter().cloned().sorted().collect()
    }
}

/// Accounting and admission of client connections for a frontend process.
#[derive(Debug, Default)]
pub struct Connector {
    blacklist: Blacklist,
    accepted: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicU64,
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Returns `false` and counts a rejection when `remote` is blacklisted.
    pub fn admit(&self, remote: &str) -> bool {
        if self.blacklist.contains(remote) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("reject blacklisted connection from {}", remote);
            false
        } else {
            self.accepted.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    pub fn on_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login_count(&self) -> u64 {
        let accepted = self.accepted.load(Ordering::Relaxed);
        accepted.saturating_sub(self.closed.load(Ordering::Relaxed))
    }
}

impl ConnectorComponent for Connector {
    fn add_blacklist(&self, ids: &[String]) {
        info!("add {} to blacklist", ids.join(","));
        self.blacklist.extend(ids.iter().cloned());
    }

    fn blacklist(&self) -> Vec<String> {
        self.blacklist.to_vec()
    }
}

impl ConnectionComponent for Connector {
    fn statistics(&self) -> Value {
        json!({
            "totalConnCount": self.accepted.load(Ordering::Relaxed),
            "loginedCount": self.login_count(),
            "rejectedCount": self.rejected.load(Ordering::Relaxed),
            "blacklistSize": self.blacklist.ids.read().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use fleet_core::host::{ConnectionComponent, ConnectorComponent};

    use crate::connector::Connector;

    #[test]
    fn test_blacklist_rejects() {
        let connector = Connector::new();
        assert!(connector.admit("10.0.0.1"));
        connector.add_blacklist(&["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        connector.add_blacklist(&["10.0.0.1".to_string()]);
        assert!(!connector.admit("10.0.0.1"));
        assert!(connector.admit("10.0.0.3"));
        connector.on_close();
        assert_eq!(ConnectorComponent::blacklist(&connector), vec!["10.0.0.1", "10.0.0.2"]);
        let stats = connector.statistics();
        assert_eq!(stats["totalConnCount"], 2);
        assert_eq!(stats["loginedCount"], 1);
        assert_eq!(stats["rejectedCount"], 1);
        assert_eq!(stats["blacklistSize"], 2);
    }
}
