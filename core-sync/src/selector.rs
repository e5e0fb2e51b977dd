//! Picks the local records that are due for another acquisition attempt

use crate::error::Result;
use bridge_traits::time::Clock;
use core_store::{BackoffPolicy, TokenKind, TokenRecord, TokenRepository};
use std::sync::Arc;
use tracing::debug;

pub struct WorkSelector {
    tokens: Arc<dyn TokenRepository>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl WorkSelector {
    pub fn new(tokens: Arc<dyn TokenRepository>, policy: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Up to `limit` due records across all kinds, least attempted first
    pub async fn select(&self, limit: u32) -> Result<Vec<TokenRecord>> {
        let now = self.clock.now();
        let mut due = Vec::new();

        for kind in TokenKind::ALL {
            due.extend(self.tokens.select_due(kind, &self.policy, now, limit).await?);
        }

        due.sort_by(|a, b| {
            a.attempt_count
                .cmp(&b.attempt_count)
                .then_with(|| b.block_number.cmp(&a.block_number))
        });
        due.truncate(limit as usize);

        debug!(selected = due.len(), limit, "Selected due records");
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::{DateTime, Duration};
    use core_store::db::create_test_pool;
    use core_store::{ObservedToken, SqliteTokenRepository, TokenKey};

    fn start() -> DateTime<chrono::Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    async fn seed(repo: &SqliteTokenRepository, kind: TokenKind, id: &str, block: i64) {
        repo.upsert_observed(
            &ObservedToken {
                key: TokenKey::new("0xc", id),
                kind,
                block_number: block,
                block_hash: "0x1".to_string(),
                metadata: "{}".to_string(),
                token_uri: None,
            },
            start(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_select_merges_kinds_by_attempts() {
        let pool = create_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTokenRepository::new(pool));
        let clock = Arc::new(ManualClock::new(start()));

        seed(&repo, TokenKind::Erc721, "a", 10).await;
        seed(&repo, TokenKind::Erc1155, "b", 20).await;
        seed(&repo, TokenKind::Erc1155, "c", 5).await;
        repo.record_failure(TokenKind::Erc1155, &TokenKey::new("0xc", "b"), start())
            .await
            .unwrap();

        let selector = WorkSelector::new(repo.clone(), BackoffPolicy::default(), clock.clone());
        let selected = selector.select(10).await.unwrap();

        let order: Vec<_> = selected
            .iter()
            .map(|r| (r.kind, r.key.token_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (TokenKind::Erc721, "a"),
                (TokenKind::Erc1155, "c"),
                (TokenKind::Erc1155, "b"),
            ]
        );

        assert_eq!(selector.select(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clock_unlocks_tiers() {
        let pool = create_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTokenRepository::new(pool));
        let clock = Arc::new(ManualClock::new(start()));
        seed(&repo, TokenKind::Erc721, "a", 10).await;

        let key = TokenKey::new("0xc", "a");
        for _ in 0..5 {
            repo.record_failure(TokenKind::Erc721, &key, start()).await.unwrap();
        }

        let selector = WorkSelector::new(repo.clone(), BackoffPolicy::default(), clock.clone());
        assert!(selector.select(10).await.unwrap().is_empty());

        clock.advance(Duration::hours(2));
        assert_eq!(selector.select(10).await.unwrap().len(), 1);
    }
}
