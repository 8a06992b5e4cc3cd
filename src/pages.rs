//! Page registry
//!
//! Pages are created lazily on first hit and never physically removed while
//! visit history exists; hiding a page places a blacklist marker that drops
//! it from active listings and aggregates.

use chrono::Utc;

use crate::db::{Database, Page, PageListing};
use crate::error::{Result, TrackError};

#[derive(Clone)]
pub struct PageRegistry {
    db: Database,
}

impl PageRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find or create the page for a (path, domain) pair, bumping its
    /// last-hit timestamp. Idempotent under concurrent creation: the insert
    /// is a no-op on the unique key and the follow-up lookup wins either way.
    pub async fn get_or_create(&self, path: &str, domain: Option<&str>) -> Result<Page> {
        let now = Utc::now();
        if let Some(page) = self.db.find_page(path, domain).await? {
            self.db.touch_page_last_hit(page.id, now).await?;
            return Ok(page);
        }

        self.db.insert_page(path, domain, now).await?;
        self.db
            .find_page(path, domain)
            .await?
            .ok_or(TrackError::NotFound("page"))
    }

    /// Total counted visits for a page
    pub async fn visit_count(&self, page_id: i64) -> Result<i64> {
        if self.db.page_by_id(page_id).await?.is_none() {
            return Err(TrackError::NotFound("page"));
        }
        Ok(self.db.count_visits_for_page(page_id).await?)
    }

    /// Soft-hide a page. Visit history is retained; hiding twice is a no-op.
    pub async fn hide(&self, page_id: i64) -> Result<()> {
        if self.db.page_by_id(page_id).await?.is_none() {
            return Err(TrackError::NotFound("page"));
        }
        self.db.insert_blacklist_marker(page_id, Utc::now()).await?;
        Ok(())
    }

    /// Remove the blacklist marker, restoring the page to active listings
    pub async fn restore(&self, page_id: i64) -> Result<()> {
        if self.db.page_by_id(page_id).await?.is_none() {
            return Err(TrackError::NotFound("page"));
        }
        self.db.remove_blacklist_marker(page_id).await?;
        Ok(())
    }

    pub async fn list_active(&self, domain: Option<&str>) -> Result<Vec<PageListing>> {
        Ok(self.db.list_pages_with_counts(domain, false).await?)
    }

    pub async fn list_hidden(&self, domain: Option<&str>) -> Result<Vec<PageListing>> {
        Ok(self.db.list_pages_with_counts(domain, true).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let db = Database::open_in_memory().await;
        let registry = PageRegistry::new(db);

        let first = registry.get_or_create("/home", Some("site.com")).await.unwrap();
        let second = registry.get_or_create("/home", Some("site.com")).await.unwrap();
        assert_eq!(first.id, second.id);

        let other = registry.get_or_create("/home", Some("other.com")).await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn visit_count_requires_a_known_page() {
        let db = Database::open_in_memory().await;
        let registry = PageRegistry::new(db.clone());

        let page = registry.get_or_create("/home", Some("site.com")).await.unwrap();
        assert_eq!(registry.visit_count(page.id).await.unwrap(), 0);

        assert!(matches!(
            registry.visit_count(9999).await,
            Err(TrackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn hide_and_restore_move_pages_between_listings() {
        let db = Database::open_in_memory().await;
        let registry = PageRegistry::new(db);

        let page = registry.get_or_create("/home", Some("site.com")).await.unwrap();
        registry.get_or_create("/about", Some("site.com")).await.unwrap();

        registry.hide(page.id).await.unwrap();

        let active = registry.list_active(None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].path, "/about");

        let hidden = registry.list_hidden(None).await.unwrap();
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].id, page.id);

        registry.restore(page.id).await.unwrap();
        assert_eq!(registry.list_active(None).await.unwrap().len(), 2);
        assert!(registry.list_hidden(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hide_and_restore_reject_unknown_pages() {
        let db = Database::open_in_memory().await;
        let registry = PageRegistry::new(db);

        assert!(matches!(registry.hide(42).await, Err(TrackError::NotFound(_))));
        assert!(matches!(registry.restore(42).await, Err(TrackError::NotFound(_))));
    }

    #[tokio::test]
    async fn listings_filter_by_domain() {
        let db = Database::open_in_memory().await;
        let registry = PageRegistry::new(db);

        registry.get_or_create("/a", Some("site.com")).await.unwrap();
        registry.get_or_create("/b", Some("other.com")).await.unwrap();

        let filtered = registry.list_active(Some("site.com")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].path, "/a");
    }
}
