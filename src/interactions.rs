//! Interaction ledger: likes, ratings and comments
//!
//! Row changes and their bounty counters move together in one transaction,
//! and counters are only ever adjusted by atomic increments.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::gateway::{require_bounty, Counter, Store};
use crate::models::{
    BountyInteraction, Comment, Like, NotificationKind, Rating, RatingSummary, RelatedType,
    MAX_RATING_SCORE, MIN_RATING_SCORE,
};
use crate::notify::{deliver, Notice, NotificationSink};

pub struct InteractionLedger<S> {
    store: Arc<S>,
    sink: Arc<dyn NotificationSink>,
}

impl<S: Store> InteractionLedger<S> {
    pub fn new(store: Arc<S>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    pub fn like_bounty(&self, user_id: Uuid, bounty_id: Uuid) -> Result<()> {
        let notice = self.store.transaction(|gw| {
            let bounty = require_bounty(gw, bounty_id)?;
            if !gw.insert_like(&Like::new(user_id, bounty_id))? {
                return Err(MarketError::AlreadyLiked);
            }
            gw.adjust_counter(bounty_id, Counter::Likes, 1)?;

            Ok((!bounty.is_publisher(user_id)).then(|| {
                Notice::new(
                    NotificationKind::BountyLiked,
                    bounty.publisher_id,
                    format!("Someone liked \"{}\"", bounty.title),
                )
                .actor(user_id)
                .related(bounty_id, RelatedType::Bounty)
            }))
        })?;

        debug!("User {} liked bounty {}", user_id, bounty_id);
        if let Some(notice) = notice {
            deliver(self.sink.as_ref(), &[notice]);
        }
        Ok(())
    }

    pub fn unlike_bounty(&self, user_id: Uuid, bounty_id: Uuid) -> Result<()> {
        self.store.transaction(|gw| {
            require_bounty(gw, bounty_id)?;
            if !gw.delete_like(user_id, bounty_id)? {
                return Err(MarketError::NotLiked);
            }
            gw.adjust_counter(bounty_id, Counter::Likes, -1)
        })?;

        debug!("User {} unliked bounty {}", user_id, bounty_id);
        Ok(())
    }

    /// Inserts or overwrites the user's score. The bounty aggregate is left
    /// alone; see [`InteractionLedger::recompute_average_rating`].
    pub fn rate_bounty(&self, user_id: Uuid, bounty_id: Uuid, score: f64) -> Result<Rating> {
        if !score.is_finite() || !(MIN_RATING_SCORE..=MAX_RATING_SCORE).contains(&score) {
            return Err(MarketError::Validation(format!(
                "score must be between {} and {}",
                MIN_RATING_SCORE, MAX_RATING_SCORE
            )));
        }

        self.store.transaction(|gw| {
            require_bounty(gw, bounty_id)?;
            gw.upsert_rating(&Rating::new(user_id, bounty_id, score))?;
            gw.find_rating(user_id, bounty_id)?
                .ok_or_else(|| MarketError::not_found("rating", bounty_id))
        })
    }

    pub fn post_comment(&self, user_id: Uuid, bounty_id: Uuid, content: &str) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MarketError::Validation("comment must not be empty".into()));
        }

        let (comment, notice) = self.store.transaction(|gw| {
            let bounty = require_bounty(gw, bounty_id)?;
            let comment = Comment::new(user_id, bounty_id, content.to_string());
            gw.insert_comment(&comment)?;
            gw.adjust_counter(bounty_id, Counter::Comments, 1)?;

            let notice = (!bounty.is_publisher(user_id)).then(|| {
                Notice::new(
                    NotificationKind::BountyCommented,
                    bounty.publisher_id,
                    format!("New comment on \"{}\"", bounty.title),
                )
                .actor(user_id)
                .related(bounty_id, RelatedType::Bounty)
                .meta("comment_id", comment.record.id.to_string())
            });
            Ok((comment, notice))
        })?;

        debug!("User {} commented on bounty {}", user_id, bounty_id);
        if let Some(notice) = notice {
            deliver(self.sink.as_ref(), &[notice]);
        }
        Ok(comment)
    }

    /// Whether the user liked the bounty and their score (0 when unrated)
    pub fn get_user_bounty_interaction(
        &self,
        user_id: Uuid,
        bounty_id: Uuid,
    ) -> Result<BountyInteraction> {
        self.store.transaction(|gw| {
            require_bounty(gw, bounty_id)?;
            let liked = gw.like_exists(user_id, bounty_id)?;
            let score = gw
                .find_rating(user_id, bounty_id)?
                .map_or(0.0, |r| r.score);
            Ok(BountyInteraction { liked, score })
        })
    }

    pub fn get_comments(&self, bounty_id: Uuid) -> Result<Vec<Comment>> {
        self.store.transaction(|gw| {
            require_bounty(gw, bounty_id)?;
            gw.comments_for_bounty(bounty_id)
        })
    }

    /// Recomputes the bounty's average rating and rating count from all ratings
    pub fn recompute_average_rating(&self, bounty_id: Uuid) -> Result<RatingSummary> {
        let summary = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            let summary = gw.rating_summary(bounty_id)?;
            bounty.average_rating = summary.average;
            bounty.rating_count = summary.count;
            bounty.record.touch();
            gw.update_bounty(&bounty)?;
            Ok(summary)
        })?;

        info!(
            "Bounty {} rating recomputed: {:.2} over {} ratings",
            bounty_id, summary.average, summary.count
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::testing::{market_with, memory_market, new_bounty};

    #[test]
    fn test_like_then_unlike_restores_count() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();
        let before = bounty.likes_count;

        ledger.like_bounty(user, bounty.id()).unwrap();
        assert_eq!(
            fx.market.settlement.get_bounty(bounty.id()).unwrap().likes_count,
            before + 1
        );
        assert!(ledger
            .get_user_bounty_interaction(user, bounty.id())
            .unwrap()
            .liked);

        ledger.unlike_bounty(user, bounty.id()).unwrap();
        assert_eq!(
            fx.market.settlement.get_bounty(bounty.id()).unwrap().likes_count,
            before
        );

        assert!(matches!(
            ledger.unlike_bounty(user, bounty.id()),
            Err(MarketError::NotLiked)
        ));
    }

    #[test]
    fn test_double_like_rejected() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();

        ledger.like_bounty(user, bounty.id()).unwrap();
        assert!(matches!(
            ledger.like_bounty(user, bounty.id()),
            Err(MarketError::AlreadyLiked)
        ));
        assert_eq!(
            fx.market.settlement.get_bounty(bounty.id()).unwrap().likes_count,
            1
        );
        assert_eq!(fx.sink.sent_to(fx.publisher), vec![NotificationKind::BountyLiked]);
    }

    #[test]
    fn test_like_counter_rolls_back_with_row() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();

        fx.store.inject_fault("adjust_counter");
        assert!(matches!(
            ledger.like_bounty(user, bounty.id()),
            Err(MarketError::Storage(_))
        ));

        let interaction = ledger.get_user_bounty_interaction(user, bounty.id()).unwrap();
        assert!(!interaction.liked);
        assert_eq!(
            fx.market.settlement.get_bounty(bounty.id()).unwrap().likes_count,
            0
        );
        assert!(fx.sink.notices().is_empty());
    }

    #[test]
    fn test_rating_upsert_keeps_latest() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();

        let first = ledger.rate_bounty(user, bounty.id(), 2.0).unwrap();
        let second = ledger.rate_bounty(user, bounty.id(), 5.0).unwrap();
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(second.score, 5.0);

        let summary = ledger.recompute_average_rating(bounty.id()).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.average, 5.0);
    }

    #[test]
    fn test_rating_range_enforced() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        for score in [0.0, 5.5, f64::NAN] {
            assert!(matches!(
                ledger.rate_bounty(Uuid::new_v4(), bounty.id(), score),
                Err(MarketError::Validation(_))
            ));
        }
        assert!(ledger.rate_bounty(Uuid::new_v4(), bounty.id(), 1.0).is_ok());
    }

    #[test]
    fn test_rating_does_not_touch_aggregate_until_recomputed() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        ledger.rate_bounty(Uuid::new_v4(), bounty.id(), 4.0).unwrap();
        ledger.rate_bounty(Uuid::new_v4(), bounty.id(), 2.0).unwrap();
        let stored = fx.market.settlement.get_bounty(bounty.id()).unwrap();
        assert_eq!(stored.average_rating, 0.0);

        ledger.recompute_average_rating(bounty.id()).unwrap();
        let stored = fx.market.settlement.get_bounty(bounty.id()).unwrap();
        assert_eq!(stored.average_rating, 3.0);
        assert_eq!(stored.rating_count, 2);
    }

    #[test]
    fn test_unrated_interaction_scores_zero() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        let interaction = fx
            .market
            .interactions
            .get_user_bounty_interaction(Uuid::new_v4(), bounty.id())
            .unwrap();
        assert_eq!(
            interaction,
            BountyInteraction {
                liked: false,
                score: 0.0
            }
        );
    }

    #[test]
    fn test_comments_count_and_order() {
        let fx = memory_market();
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();

        ledger.post_comment(user, bounty.id(), "first").unwrap();
        ledger.post_comment(user, bounty.id(), "  second  ").unwrap();
        assert!(matches!(
            ledger.post_comment(user, bounty.id(), "   "),
            Err(MarketError::Validation(_))
        ));

        let comments = ledger.get_comments(bounty.id()).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "second");
        assert_eq!(
            fx.market.settlement.get_bounty(bounty.id()).unwrap().comments_count,
            2
        );
    }

    #[test]
    fn test_like_missing_bounty() {
        let fx = memory_market();
        assert!(matches!(
            fx.market.interactions.like_bounty(Uuid::new_v4(), Uuid::new_v4()),
            Err(MarketError::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_likes_are_not_lost() {
        let fx = market_with(SqliteStore::in_memory().unwrap());
        let ledger = &fx.market.interactions;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let bounty_id = bounty.id();

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(move || ledger.like_bounty(Uuid::new_v4(), bounty_id).unwrap());
            }
        });

        let stored = fx.market.settlement.get_bounty(bounty_id).unwrap();
        assert_eq!(stored.likes_count, 16);
    }
}
