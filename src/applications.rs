//! Application workflow
//!
//! Approval is the single-assignment point: inside one transaction the
//! approved application sets the bounty receiver and every sibling still
//! pending is rejected. The bounty row is re-read under the transaction, so a
//! second approval for the same bounty always observes the first.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::gateway::{require_application, require_bounty, Store};
use crate::models::{Application, ApplicationStatus, Bounty, BountyStatus, NotificationKind, RelatedType};
use crate::notify::{deliver, Notice, NotificationSink};

pub struct ApplicationWorkflow<S> {
    store: Arc<S>,
    sink: Arc<dyn NotificationSink>,
}

fn ensure_publisher(bounty: &Bounty, actor: Uuid, action: &str) -> Result<()> {
    if !bounty.is_publisher(actor) {
        return Err(MarketError::Unauthorized(format!(
            "only the publisher can {}",
            action
        )));
    }
    Ok(())
}

fn ensure_pending(application: &Application) -> Result<()> {
    if application.status != ApplicationStatus::Pending {
        return Err(MarketError::InvalidStateTransition(format!(
            "application {} is {}, not pending",
            application.id(),
            application.status
        )));
    }
    Ok(())
}

fn rejection_notice(bounty: &Bounty, application: &Application) -> Notice {
    Notice::new(
        NotificationKind::ApplicationRejected,
        application.user_id,
        format!("Your application for \"{}\" was not accepted", bounty.title),
    )
    .actor(bounty.publisher_id)
    .related(application.id(), RelatedType::Application)
    .meta("bounty_id", bounty.id().to_string())
}

impl<S: Store> ApplicationWorkflow<S> {
    pub fn new(store: Arc<S>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    pub fn create_application(
        &self,
        bounty_id: Uuid,
        user_id: Uuid,
        note: Option<String>,
    ) -> Result<Application> {
        let (application, notice) = self.store.transaction(|gw| {
            let bounty = require_bounty(gw, bounty_id)?;
            if bounty.is_publisher(user_id) {
                return Err(MarketError::SelfApplication);
            }
            if bounty.status != BountyStatus::Created || bounty.is_assigned() {
                return Err(MarketError::InvalidStateTransition(format!(
                    "bounty {} is no longer accepting applications",
                    bounty_id
                )));
            }
            if gw.has_active_application(bounty_id, user_id)? {
                return Err(MarketError::AlreadyApplied);
            }

            let application = Application::new(bounty_id, user_id, note);
            gw.insert_application(&application)?;

            let notice = Notice::new(
                NotificationKind::BountyApplied,
                bounty.publisher_id,
                format!("New application for \"{}\"", bounty.title),
            )
            .actor(user_id)
            .related(application.id(), RelatedType::Application)
            .meta("bounty_id", bounty_id.to_string());
            Ok((application, notice))
        })?;

        info!(
            "User {} applied to bounty {} (application {})",
            user_id,
            bounty_id,
            application.id()
        );
        deliver(self.sink.as_ref(), &[notice]);
        Ok(application)
    }

    /// Approves a pending application, assigns its applicant as receiver and
    /// rejects every other pending application of the bounty.
    pub fn approve_application(&self, application_id: Uuid, actor: Uuid) -> Result<Application> {
        let (application, notices) = self.store.transaction(|gw| {
            let mut application = require_application(gw, application_id)?;
            let mut bounty = require_bounty(gw, application.bounty_id)?;
            ensure_publisher(&bounty, actor, "approve applications")?;
            ensure_pending(&application)?;

            if bounty.is_assigned() || bounty.status != BountyStatus::Created {
                debug!(
                    "Approval of {} refused: bounty {} already assigned",
                    application_id,
                    bounty.id()
                );
                return Err(MarketError::InvalidStateTransition(format!(
                    "bounty {} already has a receiver",
                    bounty.id()
                )));
            }

            gw.update_application_status(application_id, ApplicationStatus::Approved)?;
            application.status = ApplicationStatus::Approved;

            bounty.receiver_id = Some(application.user_id);
            bounty.record.touch();
            gw.update_bounty(&bounty)?;

            let rejected = gw.reject_pending_applications(bounty.id(), application_id)?;

            let mut notices = vec![Notice::new(
                NotificationKind::ApplicationApproved,
                application.user_id,
                format!("You were selected for \"{}\"", bounty.title),
            )
            .actor(actor)
            .related(application_id, RelatedType::Application)
            .meta("bounty_id", bounty.id().to_string())];
            notices.extend(rejected.iter().map(|r| rejection_notice(&bounty, r)));

            Ok((application, notices))
        })?;

        info!(
            "Approved application {} for bounty {}; receiver is {} ({} siblings rejected)",
            application_id,
            application.bounty_id,
            application.user_id,
            notices.len() - 1
        );
        deliver(self.sink.as_ref(), &notices);
        Ok(application)
    }

    pub fn reject_application(&self, application_id: Uuid, actor: Uuid) -> Result<Application> {
        let (application, notice) = self.store.transaction(|gw| {
            let mut application = require_application(gw, application_id)?;
            let bounty = require_bounty(gw, application.bounty_id)?;
            ensure_publisher(&bounty, actor, "reject applications")?;
            ensure_pending(&application)?;

            gw.update_application_status(application_id, ApplicationStatus::Rejected)?;
            application.status = ApplicationStatus::Rejected;
            let notice = rejection_notice(&bounty, &application);
            Ok((application, notice))
        })?;

        info!("Rejected application {}", application_id);
        deliver(self.sink.as_ref(), &[notice]);
        Ok(application)
    }

    /// Approved applications only, safe to show to anyone
    pub fn get_public_applications(&self, bounty_id: Uuid) -> Result<Vec<Application>> {
        self.store.transaction(|gw| {
            require_bounty(gw, bounty_id)?;
            gw.applications_for_bounty(bounty_id, Some(ApplicationStatus::Approved))
        })
    }

    /// Every application of the bounty; publisher only
    pub fn get_applications(&self, bounty_id: Uuid, actor: Uuid) -> Result<Vec<Application>> {
        self.store.transaction(|gw| {
            let bounty = require_bounty(gw, bounty_id)?;
            ensure_publisher(&bounty, actor, "list all applications")?;
            gw.applications_for_bounty(bounty_id, None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::storage::SqliteStore;
    use crate::testing::{market_with, memory_market, new_bounty, FailingSink};

    #[test]
    fn test_apply_creates_pending_application() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();

        let application = fx
            .market
            .applications
            .create_application(bounty.id(), user, Some("I can do it".into()))
            .unwrap();
        assert_eq!(application.status, ApplicationStatus::Pending);
        assert_eq!(application.note.as_deref(), Some("I can do it"));
        assert_eq!(fx.sink.sent_to(fx.publisher), vec![NotificationKind::BountyApplied]);
    }

    #[test]
    fn test_duplicate_application_rejected_until_rejected() {
        let fx = memory_market();
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();

        let first = workflow.create_application(bounty.id(), user, None).unwrap();
        assert!(matches!(
            workflow.create_application(bounty.id(), user, None),
            Err(MarketError::AlreadyApplied)
        ));

        workflow.reject_application(first.id(), fx.publisher).unwrap();
        let again = workflow.create_application(bounty.id(), user, None).unwrap();
        assert_eq!(again.status, ApplicationStatus::Pending);
    }

    #[test]
    fn test_publisher_cannot_apply() {
        let fx = memory_market();
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        assert!(matches!(
            fx.market
                .applications
                .create_application(bounty.id(), fx.publisher, None),
            Err(MarketError::SelfApplication)
        ));
    }

    #[test]
    fn test_single_assignment() {
        let fx = memory_market();
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();

        let applications: Vec<Application> = (0..4)
            .map(|_| {
                workflow
                    .create_application(bounty.id(), Uuid::new_v4(), None)
                    .unwrap()
            })
            .collect();

        let chosen = &applications[1];
        workflow
            .approve_application(chosen.id(), fx.publisher)
            .unwrap();

        let all = workflow.get_applications(bounty.id(), fx.publisher).unwrap();
        let approved: Vec<_> = all
            .iter()
            .filter(|a| a.status == ApplicationStatus::Approved)
            .collect();
        let rejected = all
            .iter()
            .filter(|a| a.status == ApplicationStatus::Rejected)
            .count();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id(), chosen.id());
        assert_eq!(rejected, 3);

        let bounty = fx.market.settlement.get_bounty(bounty.id()).unwrap();
        assert_eq!(bounty.receiver_id, Some(chosen.user_id));
        assert_eq!(bounty.status, BountyStatus::Created);

        // A second approval, even of a previously rejected application, fails
        let err = workflow
            .approve_application(applications[0].id(), fx.publisher)
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidStateTransition(_)));

        let kinds = fx.sink.kinds();
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == NotificationKind::ApplicationRejected)
                .count(),
            3
        );
        assert_eq!(fx.sink.sent_to(chosen.user_id), vec![NotificationKind::ApplicationApproved]);
    }

    #[test]
    fn test_approve_guards_against_reapproval_of_rejected() {
        let fx = memory_market();
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let a = workflow.create_application(bounty.id(), Uuid::new_v4(), None).unwrap();
        let b = workflow.create_application(bounty.id(), Uuid::new_v4(), None).unwrap();

        workflow.approve_application(a.id(), fx.publisher).unwrap();

        // Force the sibling back to pending behind the workflow's back
        fx.store
            .transaction(|gw| gw.update_application_status(b.id(), ApplicationStatus::Pending))
            .unwrap();
        assert!(matches!(
            workflow.approve_application(b.id(), fx.publisher),
            Err(MarketError::InvalidStateTransition(_))
        ));

        let approved = workflow.get_public_applications(bounty.id()).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id(), a.id());
    }

    #[test]
    fn test_only_publisher_approves_and_lists() {
        let fx = memory_market();
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let user = Uuid::new_v4();
        let application = workflow.create_application(bounty.id(), user, None).unwrap();

        assert!(matches!(
            workflow.approve_application(application.id(), user),
            Err(MarketError::Unauthorized(_))
        ));
        assert!(matches!(
            workflow.get_applications(bounty.id(), user),
            Err(MarketError::Unauthorized(_))
        ));
        assert!(workflow.get_public_applications(bounty.id()).unwrap().is_empty());
    }

    #[test]
    fn test_reject_requires_pending() {
        let fx = memory_market();
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let application = workflow
            .create_application(bounty.id(), Uuid::new_v4(), None)
            .unwrap();

        workflow.reject_application(application.id(), fx.publisher).unwrap();
        assert!(matches!(
            workflow.reject_application(application.id(), fx.publisher),
            Err(MarketError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_assigned_bounty_closed_to_applications() {
        let fx = memory_market();
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let application = workflow
            .create_application(bounty.id(), Uuid::new_v4(), None)
            .unwrap();
        workflow.approve_application(application.id(), fx.publisher).unwrap();

        assert!(matches!(
            workflow.create_application(bounty.id(), Uuid::new_v4(), None),
            Err(MarketError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_failed_sibling_rejection_rolls_back_approval() {
        let fx = market_with(MemoryStore::new());
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let a = workflow.create_application(bounty.id(), Uuid::new_v4(), None).unwrap();
        workflow.create_application(bounty.id(), Uuid::new_v4(), None).unwrap();

        fx.store.inject_fault("reject_pending_applications");
        let err = workflow.approve_application(a.id(), fx.publisher).unwrap_err();
        assert!(matches!(err, MarketError::Storage(_)));

        let bounty = fx.market.settlement.get_bounty(bounty.id()).unwrap();
        assert_eq!(bounty.receiver_id, None);
        let all = workflow.get_applications(bounty.id(), fx.publisher).unwrap();
        assert!(all.iter().all(|a| a.status == ApplicationStatus::Pending));
    }

    #[test]
    fn test_sink_failure_does_not_undo_approval() {
        let store = Arc::new(MemoryStore::new());
        let market = crate::market::Marketplace::new(
            store.clone(),
            Arc::new(FailingSink),
            Arc::new(crate::settlement::NoopHooks),
            crate::config::ListingConfig::default(),
        );
        let publisher = Uuid::new_v4();
        let bounty = market
            .settlement
            .create_bounty(publisher, new_bounty(100))
            .unwrap();
        let application = market
            .applications
            .create_application(bounty.id(), Uuid::new_v4(), None)
            .unwrap();

        let approved = market
            .applications
            .approve_application(application.id(), publisher)
            .unwrap();
        assert_eq!(approved.status, ApplicationStatus::Approved);
        assert!(market.settlement.get_bounty(bounty.id()).unwrap().is_assigned());
    }

    #[test]
    fn test_concurrent_approvals_assign_once() {
        let fx = market_with(SqliteStore::in_memory().unwrap());
        let workflow = &fx.market.applications;
        let bounty = fx
            .market
            .settlement
            .create_bounty(fx.publisher, new_bounty(100))
            .unwrap();
        let applications: Vec<Application> = (0..8)
            .map(|_| {
                workflow
                    .create_application(bounty.id(), Uuid::new_v4(), None)
                    .unwrap()
            })
            .collect();

        let successes = std::thread::scope(|scope| {
            let handles: Vec<_> = applications
                .iter()
                .map(|a| scope.spawn(move || workflow.approve_application(a.id(), fx.publisher)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|r| r.is_ok())
                .count()
        });
        assert_eq!(successes, 1);

        let approved = workflow.get_public_applications(bounty.id()).unwrap();
        assert_eq!(approved.len(), 1);
        let bounty = fx.market.settlement.get_bounty(bounty.id()).unwrap();
        assert_eq!(bounty.receiver_id, Some(approved[0].user_id));
    }
}
