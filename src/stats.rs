//! Windowed aggregation of visit rows
//!
//! Read-only: rolls historical visits into day-of-week trend buckets, a
//! top-pages ranking with an "Other" remainder row, per-domain shares and
//! totals. Every query is scoped to the selected look-back window and
//! excludes blacklisted pages.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;

/// How many ranked pages to report before folding the rest into "Other"
const TOP_PAGES_LIMIT: i64 = 5;

const DAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Quarter,
}

impl TimeRange {
    /// Unrecognized or absent labels fall back to a week
    pub fn parse(label: Option<&str>) -> Self {
        match label {
            Some("24h") => Self::Day,
            Some("30d") => Self::Month,
            Some("90d") => Self::Quarter,
            _ => Self::Week,
        }
    }

    pub fn lookback_days(self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
            Self::Quarter => "90d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendBucket {
    pub day: &'static str,
    pub visits: i64,
    pub category: TrendLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPage {
    pub path: String,
    pub domain: Option<String>,
    pub visits: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainShare {
    pub domain: String,
    pub visits: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub time_range: &'static str,
    pub visit_trend: Vec<TrendBucket>,
    pub top_pages: Vec<TopPage>,
    pub domain_stats: Vec<DomainShare>,
    pub total_visits: i64,
    pub total_pages: i64,
    pub total_domains: i64,
}

impl AggregatedStats {
    pub fn empty(range: TimeRange) -> Self {
        Self {
            time_range: range.label(),
            visit_trend: DAY_LABELS
                .into_iter()
                .map(|day| TrendBucket {
                    day,
                    visits: 0,
                    category: TrendLevel::Normal,
                })
                .collect(),
            top_pages: Vec::new(),
            domain_stats: Vec::new(),
            total_visits: 0,
            total_pages: 0,
            total_domains: 0,
        }
    }
}

#[derive(Clone)]
pub struct StatsAggregator {
    db: Database,
}

impl StatsAggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn aggregated_stats(&self, range: TimeRange) -> Result<AggregatedStats> {
        let since = Utc::now() - Duration::days(range.lookback_days());

        let total_visits = self.db.count_visits_since(since).await?;
        let visit_trend = self.visit_trend(since).await?;
        let (top_pages, total_pages) = self.top_pages(since, total_visits).await?;
        let (domain_stats, total_domains) = self.domain_stats(since, total_visits).await?;

        Ok(AggregatedStats {
            time_range: range.label(),
            visit_trend,
            top_pages,
            domain_stats,
            total_visits,
            total_pages,
            total_domains,
        })
    }

    /// Seven buckets, Monday first, each tagged relative to the window mean
    async fn visit_trend(&self, since: DateTime<Utc>) -> Result<Vec<TrendBucket>> {
        let mut buckets = [0i64; 7];
        for (dow, count) in self.db.weekday_visit_counts(since).await? {
            // SQLite reports 0 = Sunday; shift to Monday-first display order
            let index = ((dow + 6) % 7) as usize;
            buckets[index] = count;
        }

        let mean = buckets.iter().sum::<i64>() as f64 / buckets.len() as f64;
        Ok(buckets
            .iter()
            .zip(DAY_LABELS)
            .map(|(&visits, day)| TrendBucket {
                day,
                visits,
                category: categorize(visits, mean),
            })
            .collect())
    }

    /// Top pages plus a synthetic "Other" row when more pages had visits.
    /// Percentages are shares of the full windowed total, so the remainder
    /// absorbs rounding and never goes negative.
    async fn top_pages(
        &self,
        since: DateTime<Utc>,
        total_visits: i64,
    ) -> Result<(Vec<TopPage>, i64)> {
        let ranked = self.db.top_pages_since(since, TOP_PAGES_LIMIT).await?;
        let total_pages = self.db.count_pages_with_visits_since(since).await?;

        let mut top_pages: Vec<TopPage> = ranked
            .into_iter()
            .map(|(path, domain, visits)| TopPage {
                path,
                domain,
                visits,
                percentage: percentage(visits, total_visits),
            })
            .collect();

        if total_pages > TOP_PAGES_LIMIT {
            let ranked_visits: i64 = top_pages.iter().map(|p| p.visits).sum();
            let ranked_share: f64 = top_pages.iter().map(|p| p.percentage).sum();
            top_pages.push(TopPage {
                path: "Other".to_string(),
                domain: None,
                visits: total_visits - ranked_visits,
                percentage: (100.0 - ranked_share).max(0.0),
            });
        }

        Ok((top_pages, total_pages))
    }

    async fn domain_stats(
        &self,
        since: DateTime<Utc>,
        total_visits: i64,
    ) -> Result<(Vec<DomainShare>, i64)> {
        let rows = self.db.domain_visit_counts_since(since).await?;
        let total_domains = rows.iter().filter(|(domain, _)| domain.is_some()).count() as i64;

        let shares = rows
            .into_iter()
            .map(|(domain, visits)| DomainShare {
                domain: domain.unwrap_or_else(|| "unknown".to_string()),
                visits,
                percentage: percentage(visits, total_visits),
            })
            .collect();

        Ok((shares, total_domains))
    }
}

fn percentage(count: i64, total: i64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

fn categorize(visits: i64, mean: f64) -> TrendLevel {
    let value = visits as f64;
    if value < 0.7 * mean {
        TrendLevel::Low
    } else if value > 1.3 * mean {
        TrendLevel::High
    } else {
        TrendLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    async fn page(db: &Database, path: &str, domain: Option<&str>) -> i64 {
        db.insert_page(path, domain, Utc::now()).await.unwrap();
        db.find_page(path, domain).await.unwrap().unwrap().id
    }

    async fn visitor(db: &Database, n: u32) -> i64 {
        db.insert_visitor(&format!("fp-{n}"), "UA", None, None, Utc::now())
            .await
            .unwrap()
            .id
    }

    async fn visit(db: &Database, page_id: i64, visitor_id: i64, at: DateTime<Utc>) {
        assert!(db.insert_visit_if_absent(page_id, visitor_id, at).await.unwrap());
    }

    #[test]
    fn range_labels_parse_with_week_fallback() {
        assert_eq!(TimeRange::parse(Some("24h")), TimeRange::Day);
        assert_eq!(TimeRange::parse(Some("7d")), TimeRange::Week);
        assert_eq!(TimeRange::parse(Some("30d")), TimeRange::Month);
        assert_eq!(TimeRange::parse(Some("90d")), TimeRange::Quarter);
        assert_eq!(TimeRange::parse(Some("1y")), TimeRange::Week);
        assert_eq!(TimeRange::parse(None), TimeRange::Week);
    }

    #[tokio::test]
    async fn empty_dataset_produces_the_documented_shape() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db);

        let result = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        assert_eq!(result.visit_trend.len(), 7);
        assert_eq!(result.visit_trend[0].day, "Mon");
        assert_eq!(result.visit_trend[6].day, "Sun");
        for bucket in &result.visit_trend {
            assert_eq!(bucket.visits, 0);
            assert_eq!(bucket.category, TrendLevel::Normal);
        }
        assert!(result.top_pages.is_empty());
        assert!(result.domain_stats.is_empty());
        assert_eq!(result.total_visits, 0);
        assert_eq!(result.total_pages, 0);
        assert_eq!(result.total_domains, 0);
    }

    #[tokio::test]
    async fn trend_tags_todays_spike_high_and_quiet_days_low() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db.clone());

        let home = page(&db, "/home", Some("site.com")).await;
        for n in 0..3 {
            let v = visitor(&db, n).await;
            visit(&db, home, v, Utc::now()).await;
        }

        let result = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        let today = Utc::now().weekday().num_days_from_monday() as usize;
        for (index, bucket) in result.visit_trend.iter().enumerate() {
            if index == today {
                assert_eq!(bucket.visits, 3);
                assert_eq!(bucket.category, TrendLevel::High);
            } else {
                assert_eq!(bucket.visits, 0);
                assert_eq!(bucket.category, TrendLevel::Low);
            }
        }
    }

    #[tokio::test]
    async fn top_pages_fold_the_remainder_into_other() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db.clone());

        let visitors: Vec<i64> = {
            let mut ids = Vec::new();
            for n in 0..3 {
                ids.push(visitor(&db, n).await);
            }
            ids
        };

        // Six pages with visits: 3, 2, 1, 1, 1, 1 (total 9)
        let popular = page(&db, "/popular", Some("site.com")).await;
        for &v in &visitors {
            visit(&db, popular, v, Utc::now()).await;
        }
        let runner_up = page(&db, "/runner-up", Some("site.com")).await;
        for &v in &visitors[..2] {
            visit(&db, runner_up, v, Utc::now()).await;
        }
        for path in ["/c", "/d", "/e", "/f"] {
            let p = page(&db, path, Some("site.com")).await;
            visit(&db, p, visitors[0], Utc::now()).await;
        }

        let result = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        assert_eq!(result.total_visits, 9);
        assert_eq!(result.total_pages, 6);
        assert_eq!(result.top_pages.len(), 6);

        assert_eq!(result.top_pages[0].path, "/popular");
        assert_eq!(result.top_pages[0].visits, 3);

        let other = result.top_pages.last().unwrap();
        assert_eq!(other.path, "Other");
        assert_eq!(other.visits, 1);
        assert!(other.percentage >= 0.0);

        let share_sum: f64 = result.top_pages.iter().map(|p| p.percentage).sum();
        assert!(share_sum <= 100.0 + 1e-9);
    }

    #[tokio::test]
    async fn no_other_row_when_five_or_fewer_pages_have_visits() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db.clone());

        let v = visitor(&db, 0).await;
        for path in ["/a", "/b", "/c"] {
            let p = page(&db, path, Some("site.com")).await;
            visit(&db, p, v, Utc::now()).await;
        }

        let result = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        assert_eq!(result.top_pages.len(), 3);
        assert!(result.top_pages.iter().all(|p| p.path != "Other"));
    }

    #[tokio::test]
    async fn domains_rank_with_an_unknown_bucket() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db.clone());

        let a = page(&db, "/a", Some("site.com")).await;
        let b = page(&db, "/b", Some("site.com")).await;
        let c = page(&db, "/c", Some("other.com")).await;
        let orphan = page(&db, "/d", None).await;

        let v = visitor(&db, 0).await;
        for p in [a, b, c, orphan] {
            visit(&db, p, v, Utc::now()).await;
        }

        let result = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        assert_eq!(result.domain_stats[0].domain, "site.com");
        assert_eq!(result.domain_stats[0].visits, 2);
        assert_eq!(result.domain_stats[0].percentage, 50.0);
        assert!(result.domain_stats.iter().any(|d| d.domain == "unknown"));
        // "unknown" is not a real domain
        assert_eq!(result.total_domains, 2);
    }

    #[tokio::test]
    async fn blacklisted_pages_are_excluded_everywhere() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db.clone());

        let kept = page(&db, "/kept", Some("site.com")).await;
        let hidden = page(&db, "/hidden", Some("site.com")).await;
        let v = visitor(&db, 0).await;
        visit(&db, kept, v, Utc::now()).await;
        visit(&db, hidden, v, Utc::now()).await;

        db.insert_blacklist_marker(hidden, Utc::now()).await.unwrap();

        let result = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        assert_eq!(result.total_visits, 1);
        assert_eq!(result.total_pages, 1);
        assert!(result.top_pages.iter().all(|p| p.path != "/hidden"));
    }

    #[tokio::test]
    async fn the_window_scopes_which_visits_count() {
        let db = Database::open_in_memory().await;
        let stats = StatsAggregator::new(db.clone());

        let p = page(&db, "/old-news", Some("site.com")).await;
        let v = visitor(&db, 0).await;
        visit(&db, p, v, Utc::now() - Duration::days(10)).await;

        let week = stats.aggregated_stats(TimeRange::Week).await.unwrap();
        assert_eq!(week.total_visits, 0);

        let month = stats.aggregated_stats(TimeRange::Month).await.unwrap();
        assert_eq!(month.total_visits, 1);
    }
}
