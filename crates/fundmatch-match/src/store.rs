//! Persistent match store (SQLite via sqlx)
//!
//! One row per (user, opportunity) pair; saving a user's matches replaces
//! the whole ranked list inside a transaction. Reads come back ordered by
//! confidence. Keywords are stored JSON-serialized and parsed on read.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::debug;

use fundmatch_common::FundingMatch;

/// Match-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Aggregated per-user search activity.
#[derive(Debug, Clone, Serialize)]
pub struct RecentUser {
    pub user_id: String,
    pub match_count: i64,
    pub last_search: Option<DateTime<Utc>>,
}

/// SQLite-backed store for ranked match lists.
#[derive(Clone)]
pub struct MatchStore {
    pool: SqlitePool,
}

impl MatchStore {
    /// Open (creating the file and schema if needed).
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS funding_matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                opportunity_id TEXT NOT NULL,
                title TEXT NOT NULL,
                agency TEXT NOT NULL,
                deadline TEXT NOT NULL,
                url TEXT,
                description TEXT,
                keywords TEXT,
                confidence_score REAL NOT NULL,
                similarity_score REAL NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, opportunity_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_matches \
             ON funding_matches(user_id, confidence_score DESC)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Replace the user's entire ranked list atomically.
    pub async fn save(&self, user_id: &str, matches: &[FundingMatch]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM funding_matches WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for m in matches {
            let keywords = serde_json::to_string(&m.keywords).unwrap_or_else(|_| "[]".to_string());

            sqlx::query(
                "INSERT OR REPLACE INTO funding_matches \
                 (user_id, opportunity_id, title, agency, deadline, url, \
                  description, keywords, confidence_score, similarity_score) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(&m.opportunity_id)
            .bind(&m.title)
            .bind(&m.agency)
            .bind(&m.deadline)
            .bind(&m.url)
            .bind(&m.description)
            .bind(keywords)
            .bind(m.confidence_score)
            .bind(m.similarity_score)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(user_id, count = matches.len(), "saved ranked match list");
        Ok(())
    }

    /// The user's matches, ordered by confidence descending.
    pub async fn get(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<FundingMatch>, StoreError> {
        let base = "SELECT * FROM funding_matches WHERE user_id = ? \
                    ORDER BY confidence_score DESC";

        let rows = match limit {
            Some(n) => {
                sqlx::query(&format!("{base} LIMIT ?"))
                    .bind(user_id)
                    .bind(n)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(base).bind(user_id).fetch_all(&self.pool).await?,
        };

        Ok(rows.iter().map(row_to_match).collect())
    }

    pub async fn count(&self, user_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM funding_matches WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Users with matches, most recently active first.
    pub async fn recent_users(&self, limit: i64) -> Result<Vec<RecentUser>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, COUNT(*) AS match_count, MAX(created_at) AS last_search \
             FROM funding_matches GROUP BY user_id ORDER BY last_search DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RecentUser {
                user_id: row.get("user_id"),
                match_count: row.get("match_count"),
                last_search: parse_sqlite_timestamp(row.get::<Option<String>, _>("last_search")),
            })
            .collect())
    }
}

fn row_to_match(row: &sqlx::sqlite::SqliteRow) -> FundingMatch {
    let keywords: Vec<String> = row
        .get::<Option<String>, _>("keywords")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    FundingMatch {
        user_id: row.get("user_id"),
        opportunity_id: row.get("opportunity_id"),
        title: row.get("title"),
        agency: row.get("agency"),
        deadline: row.get("deadline"),
        url: row.get::<Option<String>, _>("url").unwrap_or_default(),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        keywords,
        confidence_score: row.get("confidence_score"),
        similarity_score: row.get("similarity_score"),
        created_at: parse_sqlite_timestamp(row.get::<Option<String>, _>("created_at")),
    }
}

fn parse_sqlite_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(user_id: &str, opp_id: &str, confidence: f64) -> FundingMatch {
        FundingMatch {
            user_id: user_id.to_string(),
            opportunity_id: opp_id.to_string(),
            title: format!("Opportunity {opp_id}"),
            agency: "NASA".into(),
            deadline: "2099-01-15".into(),
            url: "https://example.gov".into(),
            description: "desc".into(),
            keywords: vec!["autonomy".into(), "sensing".into()],
            confidence_score: confidence,
            similarity_score: confidence / 100.0,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let tmp = tempdir().unwrap();
        let store = MatchStore::open(&tmp.path().join("matches.db")).await.unwrap();

        store
            .save("u1", &[sample("u1", "a", 85.5), sample("u1", "b", 72.3)])
            .await
            .unwrap();

        let matches = store.get("u1", None).await.unwrap();
        assert_eq!(matches.len(), 2);
        // Ordered by confidence descending
        assert_eq!(matches[0].opportunity_id, "a");
        assert_eq!(matches[0].keywords, vec!["autonomy", "sensing"]);
        assert!(matches[0].created_at.is_some());

        assert_eq!(store.count("u1").await.unwrap(), 2);
        assert_eq!(store.count("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_list() {
        let tmp = tempdir().unwrap();
        let store = MatchStore::open(&tmp.path().join("matches.db")).await.unwrap();

        store
            .save("u1", &[sample("u1", "a", 90.0), sample("u1", "b", 80.0)])
            .await
            .unwrap();
        store.save("u1", &[sample("u1", "c", 70.0)]).await.unwrap();

        let matches = store.get("u1", None).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].opportunity_id, "c");
    }

    #[tokio::test]
    async fn test_get_with_limit() {
        let tmp = tempdir().unwrap();
        let store = MatchStore::open(&tmp.path().join("matches.db")).await.unwrap();

        let all: Vec<FundingMatch> = (0..5)
            .map(|i| sample("u1", &format!("opp{i}"), 50.0 + i as f64))
            .collect();
        store.save("u1", &all).await.unwrap();

        let top = store.get("u1", Some(2)).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].opportunity_id, "opp4");
    }

    #[tokio::test]
    async fn test_recent_users() {
        let tmp = tempdir().unwrap();
        let store = MatchStore::open(&tmp.path().join("matches.db")).await.unwrap();

        store.save("u1", &[sample("u1", "a", 90.0)]).await.unwrap();
        store
            .save("u2", &[sample("u2", "a", 80.0), sample("u2", "b", 70.0)])
            .await
            .unwrap();

        let recent = store.recent_users(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        let u2 = recent.iter().find(|r| r.user_id == "u2").unwrap();
        assert_eq!(u2.match_count, 2);
    }
}
