//! Milestone tracker
//!
//! Milestones are edited by the publisher while the bounty is still `Created`;
//! once the receiver confirms, the milestone structure is frozen and only the
//! settlement engine touches completion flags (through [`complete_all`]).

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::gateway::{require_bounty, require_milestone, Gateway, Store};
use crate::models::{Bounty, BountyStatus, Milestone, MilestoneInput};

pub struct MilestoneTracker<S> {
    store: Arc<S>,
}

/// Milestones may only change while the bounty is `Created`
fn ensure_editable(bounty: &Bounty) -> Result<()> {
    if bounty.status != BountyStatus::Created {
        debug!(
            "Rejected milestone change on bounty {} in status {}",
            bounty.id(),
            bounty.status
        );
        return Err(MarketError::InvalidStateTransition(format!(
            "milestones are locked once the bounty is {}",
            bounty.status
        )));
    }
    Ok(())
}

fn ensure_publisher(bounty: &Bounty, actor: Uuid) -> Result<()> {
    if !bounty.is_publisher(actor) {
        return Err(MarketError::Unauthorized(
            "only the publisher can manage milestones".into(),
        ));
    }
    Ok(())
}

/// Marks every incomplete milestone of the bounty completed.
///
/// Fails with `NotFound` when the bounty has no milestones at all.
pub(crate) fn complete_all(gw: &mut dyn Gateway, bounty_id: Uuid) -> Result<usize> {
    if gw.milestones_for_bounty(bounty_id)?.is_empty() {
        return Err(MarketError::NotFound(format!(
            "milestones for bounty {}",
            bounty_id
        )));
    }
    gw.complete_milestones(bounty_id)
}

impl<S: Store> MilestoneTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn create_milestone(
        &self,
        bounty_id: Uuid,
        actor: Uuid,
        input: MilestoneInput,
    ) -> Result<Milestone> {
        input.validate()?;
        let milestone = self.store.transaction(|gw| {
            let bounty = require_bounty(gw, bounty_id)?;
            ensure_publisher(&bounty, actor)?;
            ensure_editable(&bounty)?;

            let milestone = Milestone::new(bounty_id, input);
            gw.insert_milestone(&milestone)?;
            Ok(milestone)
        })?;

        info!("Created milestone {} on bounty {}", milestone.id(), bounty_id);
        Ok(milestone)
    }

    pub fn update_milestone(
        &self,
        milestone_id: Uuid,
        actor: Uuid,
        input: MilestoneInput,
    ) -> Result<Milestone> {
        input.validate()?;
        self.store.transaction(|gw| {
            let mut milestone = require_milestone(gw, milestone_id)?;
            let bounty = require_bounty(gw, milestone.bounty_id)?;
            ensure_publisher(&bounty, actor)?;
            ensure_editable(&bounty)?;

            milestone.title = input.title;
            milestone.description = input.description;
            milestone.due_date = input.due_date;
            milestone.record.touch();
            gw.update_milestone(&milestone)?;
            Ok(milestone)
        })
    }

    pub fn delete_milestone(&self, milestone_id: Uuid, actor: Uuid) -> Result<()> {
        self.store.transaction(|gw| {
            let milestone = require_milestone(gw, milestone_id)?;
            let bounty = require_bounty(gw, milestone.bounty_id)?;
            ensure_publisher(&bounty, actor)?;
            ensure_editable(&bounty)?;

            gw.delete_milestone(milestone_id)?;
            Ok(())
        })?;

        info!("Deleted milestone {}", milestone_id);
        Ok(())
    }

    /// The receiver may only flip the completion flag
    pub fn update_milestone_by_receiver(
        &self,
        milestone_id: Uuid,
        actor: Uuid,
        is_completed: bool,
    ) -> Result<Milestone> {
        self.store.transaction(|gw| {
            let mut milestone = require_milestone(gw, milestone_id)?;
            let bounty = require_bounty(gw, milestone.bounty_id)?;
            if !bounty.is_receiver(actor) {
                return Err(MarketError::Unauthorized(
                    "only the receiver can update milestone progress".into(),
                ));
            }
            ensure_editable(&bounty)?;

            milestone.is_completed = is_completed;
            milestone.record.touch();
            gw.update_milestone(&milestone)?;
            Ok(milestone)
        })
    }

    pub fn get_milestones(&self, bounty_id: Uuid) -> Result<Vec<Milestone>> {
        self.store.transaction(|gw| {
            require_bounty(gw, bounty_id)?;
            gw.milestones_for_bounty(bounty_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assigned_bounty, memory_market, milestone_input, new_bounty};

    #[test]
    fn test_publisher_manages_milestones() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let tracker = &fx.market.milestones;

        let m1 = tracker
            .create_milestone(bounty.id(), fx.publisher, milestone_input("design"))
            .unwrap();
        let m2 = tracker
            .create_milestone(bounty.id(), fx.publisher, milestone_input("build"))
            .unwrap();

        let renamed = tracker
            .update_milestone(m1.id(), fx.publisher, milestone_input("design v2"))
            .unwrap();
        assert_eq!(renamed.title, "design v2");

        tracker.delete_milestone(m2.id(), fx.publisher).unwrap();
        let remaining = tracker.get_milestones(bounty.id()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), m1.id());
    }

    #[test]
    fn test_non_publisher_rejected() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        let err = fx
            .market
            .milestones
            .create_milestone(bounty.id(), Uuid::new_v4(), milestone_input("x"))
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthorized(_)));
    }

    #[test]
    fn test_empty_title_rejected() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        let err = fx
            .market
            .milestones
            .create_milestone(bounty.id(), fx.publisher, milestone_input(" "))
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[test]
    fn test_receiver_only_flips_completion() {
        let fx = memory_market();
        let receiver = Uuid::new_v4();
        let bounty = assigned_bounty(&fx, 100, receiver);
        let tracker = &fx.market.milestones;
        let milestone = tracker.get_milestones(bounty.id()).unwrap().remove(0);

        let updated = tracker
            .update_milestone_by_receiver(milestone.id(), receiver, true)
            .unwrap();
        assert!(updated.is_completed);
        assert_eq!(updated.title, milestone.title);
        assert_eq!(updated.due_date, milestone.due_date);

        let err = tracker
            .update_milestone_by_receiver(milestone.id(), fx.publisher, false)
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthorized(_)));
    }

    #[test]
    fn test_structure_locked_after_confirmation() {
        let fx = memory_market();
        let receiver = Uuid::new_v4();
        let bounty = assigned_bounty(&fx, 100, receiver);
        let milestone = fx.market.milestones.get_milestones(bounty.id()).unwrap().remove(0);

        fx.market
            .settlement
            .confirm_milestones(bounty.id(), receiver)
            .unwrap();

        let tracker = &fx.market.milestones;
        assert!(matches!(
            tracker.create_milestone(bounty.id(), fx.publisher, milestone_input("late")),
            Err(MarketError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            tracker.delete_milestone(milestone.id(), fx.publisher),
            Err(MarketError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            tracker.update_milestone_by_receiver(milestone.id(), receiver, false),
            Err(MarketError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_complete_all_requires_milestones() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        let err = fx
            .store
            .transaction(|gw| complete_all(gw, bounty.id()))
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
    }

    #[test]
    fn test_missing_milestone_not_found() {
        let fx = memory_market();
        let err = fx
            .market
            .milestones
            .delete_milestone(Uuid::new_v4(), fx.publisher)
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
    }
}
