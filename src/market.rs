//! Marketplace facade
//!
//! Wires every component to one store and one notification sink.

use std::sync::Arc;

use uuid::Uuid;

use crate::applications::ApplicationWorkflow;
use crate::config::ListingConfig;
use crate::error::{MarketError, Result};
use crate::gateway::Store;
use crate::interactions::InteractionLedger;
use crate::milestones::MilestoneTracker;
use crate::models::Notification;
use crate::notify::NotificationSink;
use crate::settlement::{SettlementEngine, SettlementHooks};

pub struct Marketplace<S> {
    pub settlement: SettlementEngine<S>,
    pub applications: ApplicationWorkflow<S>,
    pub milestones: MilestoneTracker<S>,
    pub interactions: InteractionLedger<S>,
    store: Arc<S>,
}

impl<S: Store> Marketplace<S> {
    pub fn new(
        store: Arc<S>,
        sink: Arc<dyn NotificationSink>,
        hooks: Arc<dyn SettlementHooks>,
        listing: ListingConfig,
    ) -> Self {
        Self {
            settlement: SettlementEngine::new(store.clone(), sink.clone(), hooks, listing),
            applications: ApplicationWorkflow::new(store.clone(), sink.clone()),
            milestones: MilestoneTracker::new(store.clone()),
            interactions: InteractionLedger::new(store.clone(), sink),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ========================================================================
    // NOTIFICATIONS (read side)
    // ========================================================================

    /// Newest first
    pub fn notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.store
            .transaction(|gw| gw.notifications_for_user(user_id))
    }

    pub fn mark_notification_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<()> {
        let found = self
            .store
            .transaction(|gw| gw.mark_notification_read(notification_id, user_id))?;
        if !found {
            return Err(MarketError::not_found("notification", notification_id));
        }
        Ok(())
    }

    pub fn delete_notification(&self, notification_id: Uuid, user_id: Uuid) -> Result<()> {
        let found = self
            .store
            .transaction(|gw| gw.delete_notification(notification_id, user_id))?;
        if !found {
            return Err(MarketError::not_found("notification", notification_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::models::NotificationKind;
    use crate::notify::StoreSink;
    use crate::settlement::NoopHooks;
    use crate::testing::new_bounty;

    #[test]
    fn test_store_sink_feeds_inbox() {
        let store = Arc::new(MemoryStore::new());
        let market = Marketplace::new(
            store.clone(),
            Arc::new(StoreSink::new(store.clone())),
            Arc::new(NoopHooks),
            ListingConfig::default(),
        );
        let publisher = Uuid::new_v4();
        let fan = Uuid::new_v4();
        let bounty = market
            .settlement
            .create_bounty(publisher, new_bounty(50))
            .unwrap();

        market.interactions.like_bounty(fan, bounty.id()).unwrap();
        market
            .interactions
            .post_comment(fan, bounty.id(), "nice")
            .unwrap();

        let inbox = market.notifications(publisher).unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].kind, NotificationKind::BountyCommented);
        assert_eq!(inbox[1].kind, NotificationKind::BountyLiked);
        assert_eq!(inbox[1].actor_id, Some(fan));

        // Another user cannot touch the publisher's notifications
        assert!(matches!(
            market.mark_notification_read(inbox[0].record.id, fan),
            Err(MarketError::NotFound(_))
        ));

        market
            .mark_notification_read(inbox[0].record.id, publisher)
            .unwrap();
        market
            .delete_notification(inbox[1].record.id, publisher)
            .unwrap();

        let inbox = market.notifications(publisher).unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].is_read);
    }
}
