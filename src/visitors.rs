//! Visitor identity resolution
//!
//! A visitor is identified by a one-way fingerprint of their remote address
//! and user agent; the same pair always resolves to the same visitor row.
//! Header normalization (proxy-header IP extraction, truncation) happens in
//! the web layer — this module receives already-normalized strings.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::{Database, Visitor};
use crate::error::Result;

#[derive(Clone)]
pub struct VisitorResolver {
    db: Database,
}

impl VisitorResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Anonymous fingerprint for a (remote address, user agent) pair
    pub fn fingerprint(remote_addr: &str, user_agent: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(remote_addr.as_bytes());
        hasher.update(b" ");
        hasher.update(user_agent.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up or create the visitor behind a hit.
    /// Returns the visitor and whether this call created it.
    pub async fn resolve(
        &self,
        remote_addr: &str,
        user_agent: &str,
        referrer: Option<&str>,
        country: Option<&str>,
    ) -> Result<(Visitor, bool)> {
        let fingerprint = Self::fingerprint(remote_addr, user_agent);

        if let Some(visitor) = self.db.find_visitor_by_fingerprint(&fingerprint).await? {
            // last_seen_at is telemetry; its failure must not sink the hit
            if let Err(e) = self.db.touch_visitor_last_seen(visitor.id, Utc::now()).await {
                warn!("Failed to update last_seen for visitor {}: {}", visitor.id, e);
            }
            return Ok((visitor, false));
        }

        let visitor = self
            .db
            .insert_visitor(&fingerprint, user_agent, referrer, country, Utc::now())
            .await?;
        Ok((visitor, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = VisitorResolver::fingerprint("1.2.3.4", "UA-A");
        let b = VisitorResolver::fingerprint("1.2.3.4", "UA-A");
        assert_eq!(a, b);
        assert_ne!(a, VisitorResolver::fingerprint("1.2.3.4", "UA-B"));
        assert_ne!(a, VisitorResolver::fingerprint("4.3.2.1", "UA-A"));
    }

    #[tokio::test]
    async fn resolving_twice_yields_the_same_visitor() {
        let db = Database::open_in_memory().await;
        let resolver = VisitorResolver::new(db);

        let (first, created) = resolver
            .resolve("1.2.3.4", "UA-A", Some("https://ref.example"), Some("DE"))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = resolver.resolve("1.2.3.4", "UA-A", None, None).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.referrer.as_deref(), Some("https://ref.example"));
        assert_eq!(second.country.as_deref(), Some("DE"));
    }

    #[tokio::test]
    async fn distinct_agents_resolve_to_distinct_visitors() {
        let db = Database::open_in_memory().await;
        let resolver = VisitorResolver::new(db);

        let (a, _) = resolver.resolve("1.2.3.4", "UA-A", None, None).await.unwrap();
        let (b, _) = resolver.resolve("1.2.3.4", "UA-B", None, None).await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
