//! Settlement engine
//!
//! Drives the bounty status machine:
//!
//! ```text
//! Created --confirm (receiver)--> MilestonesConfirmed --verify (publisher)--> MilestonesVerified
//!     --apply (receiver)--> Settling --settle (publisher)--> Settled
//!                                    \--cancel (either)---> Cancelled
//! ```
//!
//! `payment_status` moves on its own axis: `unpaid` until settlement is
//! requested, `pending` while settling, `completed` once paid out. Each
//! transition runs in a single transaction together with the milestone and
//! application rows it touches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ListingConfig;
use crate::error::{MarketError, Result};
use crate::gateway::{require_bounty, Counter, Store};
use crate::milestones::complete_all;
use crate::models::{
    Application, ApplicationStatus, Bounty, BountyFilter, BountyStatus, BountyUpdate, NewBounty,
    NotificationKind, PaymentStatus, RelatedType,
};
use crate::notify::{deliver, Notice, NotificationSink};

// ============================================================================
// PAYOUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub application_id: Uuid,
    pub user_id: Uuid,
    /// Minor currency units
    pub amount: i64,
}

/// Result of paying out a bounty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub bounty_id: Uuid,
    pub payouts: Vec<Payout>,
}

impl Settlement {
    pub fn total(&self) -> i64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

/// Splits `reward` evenly; the remainder goes one unit each to the earliest applications
pub fn split_reward(reward: i64, approved: &[Application]) -> Vec<Payout> {
    if approved.is_empty() {
        return Vec::new();
    }
    let count = approved.len() as i64;
    let share = reward / count;
    let remainder = reward % count;

    approved
        .iter()
        .enumerate()
        .map(|(i, application)| Payout {
            application_id: application.id(),
            user_id: application.user_id,
            amount: share + i64::from((i as i64) < remainder),
        })
        .collect()
}

/// Payment side effects. Escrow and penalties are not implemented; the hooks
/// run after the transaction commits and their failures are only logged.
pub trait SettlementHooks: Send + Sync {
    fn charge_cancellation_penalty(&self, bounty: &Bounty, cancelled_by: Uuid) -> anyhow::Result<()>;
    fn disburse(&self, settlement: &Settlement) -> anyhow::Result<()>;
}

pub struct NoopHooks;

impl SettlementHooks for NoopHooks {
    fn charge_cancellation_penalty(&self, _bounty: &Bounty, _cancelled_by: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    fn disburse(&self, _settlement: &Settlement) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Publisher,
    Receiver,
}

impl Role {
    fn check(self, bounty: &Bounty, actor: Uuid, action: &str) -> Result<()> {
        let allowed = match self {
            Role::Publisher => bounty.is_publisher(actor),
            Role::Receiver => bounty.is_receiver(actor),
        };
        if !allowed {
            let role = match self {
                Role::Publisher => "publisher",
                Role::Receiver => "receiver",
            };
            return Err(MarketError::Unauthorized(format!(
                "only the {} can {}",
                role, action
            )));
        }
        Ok(())
    }
}

fn expect_status(bounty: &Bounty, expected: BountyStatus, action: &str) -> Result<()> {
    if bounty.status != expected {
        debug!(
            "Refused to {} bounty {}: status is {}, expected {}",
            action,
            bounty.id(),
            bounty.status,
            expected
        );
        return Err(MarketError::InvalidStateTransition(format!(
            "cannot {} a bounty in status {}",
            action, bounty.status
        )));
    }
    Ok(())
}

/// Receiver of a bounty that reached a receiver-only status
fn receiver_of(bounty: &Bounty) -> Result<Uuid> {
    bounty.receiver_id.ok_or_else(|| {
        MarketError::InvalidStateTransition(format!("bounty {} has no receiver", bounty.id()))
    })
}

fn bounty_notice(
    kind: NotificationKind,
    recipient: Uuid,
    actor: Uuid,
    bounty: &Bounty,
    title: String,
) -> Notice {
    Notice::new(kind, recipient, title)
        .actor(actor)
        .related(bounty.id(), RelatedType::Bounty)
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct SettlementEngine<S> {
    store: Arc<S>,
    sink: Arc<dyn NotificationSink>,
    hooks: Arc<dyn SettlementHooks>,
    listing: ListingConfig,
}

impl<S: Store> SettlementEngine<S> {
    pub fn new(
        store: Arc<S>,
        sink: Arc<dyn NotificationSink>,
        hooks: Arc<dyn SettlementHooks>,
        listing: ListingConfig,
    ) -> Self {
        Self {
            store,
            sink,
            hooks,
            listing,
        }
    }

    // ------------------------------------------------------------------------
    // Bounty records
    // ------------------------------------------------------------------------

    pub fn create_bounty(&self, publisher_id: Uuid, input: NewBounty) -> Result<Bounty> {
        input.validate()?;
        let bounty = Bounty::new(publisher_id, input);
        self.store.transaction(|gw| gw.insert_bounty(&bounty))?;

        info!(
            "Bounty {} created by {} (reward {})",
            bounty.id(),
            publisher_id,
            bounty.reward
        );
        Ok(bounty)
    }

    pub fn get_bounty(&self, bounty_id: Uuid) -> Result<Bounty> {
        self.store.transaction(|gw| require_bounty(gw, bounty_id))
    }

    /// Newest first; the page size falls back to the configured default and
    /// never exceeds the configured maximum
    pub fn list_bounties(&self, mut filter: BountyFilter) -> Result<Vec<Bounty>> {
        filter.limit = Some(self.listing.clamp(filter.limit));
        self.store.transaction(|gw| gw.find_bounties(&filter))
    }

    pub fn update_bounty(&self, bounty_id: Uuid, actor: Uuid, update: BountyUpdate) -> Result<Bounty> {
        update.validate()?;
        let bounty = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            Role::Publisher.check(&bounty, actor, "edit the bounty")?;
            Self::ensure_open(&bounty, "edit")?;

            update.apply_to(&mut bounty);
            bounty.record.touch();
            gw.update_bounty(&bounty)?;
            require_bounty(gw, bounty_id)
        })?;

        info!("Bounty {} updated", bounty_id);
        Ok(bounty)
    }

    pub fn delete_bounty(&self, bounty_id: Uuid, actor: Uuid) -> Result<()> {
        self.store.transaction(|gw| {
            let bounty = require_bounty(gw, bounty_id)?;
            Role::Publisher.check(&bounty, actor, "delete the bounty")?;
            Self::ensure_open(&bounty, "delete")?;
            gw.delete_bounty(bounty_id)?;
            Ok(())
        })?;

        info!("Bounty {} deleted", bounty_id);
        Ok(())
    }

    pub fn increment_view_count(&self, bounty_id: Uuid) -> Result<()> {
        self.store
            .transaction(|gw| gw.adjust_counter(bounty_id, Counter::Views, 1))
    }

    /// Editable only while `Created` and before anyone is assigned
    fn ensure_open(bounty: &Bounty, action: &str) -> Result<()> {
        expect_status(bounty, BountyStatus::Created, action)?;
        if bounty.is_assigned() {
            return Err(MarketError::InvalidStateTransition(format!(
                "cannot {} a bounty that already has a receiver",
                action
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Receiver declares the work done: completes all milestones and moves to `MilestonesConfirmed`
    pub fn confirm_milestones(&self, bounty_id: Uuid, actor: Uuid) -> Result<Bounty> {
        let (bounty, notice) = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            Role::Receiver.check(&bounty, actor, "confirm milestones")?;
            expect_status(&bounty, BountyStatus::Created, "confirm milestones of")?;
            complete_all(gw, bounty_id)?;

            bounty.status = BountyStatus::MilestonesConfirmed;
            bounty.record.touch();
            gw.update_bounty(&bounty)?;

            let notice = bounty_notice(
                NotificationKind::MilestonesSubmitted,
                bounty.publisher_id,
                actor,
                &bounty,
                format!("Milestones of \"{}\" were submitted for review", bounty.title),
            );
            Ok((bounty, notice))
        })?;

        info!("Bounty {} milestones confirmed by receiver {}", bounty_id, actor);
        deliver(self.sink.as_ref(), &[notice]);
        Ok(bounty)
    }

    /// Publisher accepts the confirmed work and moves to `MilestonesVerified`
    pub fn verify_milestones(&self, bounty_id: Uuid, actor: Uuid) -> Result<Bounty> {
        let (bounty, notice) = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            Role::Publisher.check(&bounty, actor, "verify milestones")?;
            expect_status(&bounty, BountyStatus::MilestonesConfirmed, "verify milestones of")?;
            let receiver = receiver_of(&bounty)?;
            complete_all(gw, bounty_id)?;

            bounty.status = BountyStatus::MilestonesVerified;
            bounty.record.touch();
            gw.update_bounty(&bounty)?;

            let notice = bounty_notice(
                NotificationKind::MilestonesVerified,
                receiver,
                actor,
                &bounty,
                format!("Milestones of \"{}\" were verified", bounty.title),
            );
            Ok((bounty, notice))
        })?;

        info!("Bounty {} milestones verified by publisher {}", bounty_id, actor);
        deliver(self.sink.as_ref(), &[notice]);
        Ok(bounty)
    }

    /// Receiver requests payment: `Settling`, payment `pending`
    pub fn apply_settlement(&self, bounty_id: Uuid, actor: Uuid) -> Result<Bounty> {
        let (bounty, notice) = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            Role::Receiver.check(&bounty, actor, "apply for settlement")?;
            expect_status(&bounty, BountyStatus::MilestonesVerified, "apply settlement to")?;

            bounty.status = BountyStatus::Settling;
            bounty.payment_status = PaymentStatus::Pending;
            bounty.record.touch();
            gw.update_bounty(&bounty)?;

            let notice = bounty_notice(
                NotificationKind::SettlementApplied,
                bounty.publisher_id,
                actor,
                &bounty,
                format!("Settlement requested for \"{}\"", bounty.title),
            )
            .meta("reward", bounty.reward);
            Ok((bounty, notice))
        })?;

        info!("Bounty {} entered settlement", bounty_id);
        deliver(self.sink.as_ref(), &[notice]);
        Ok(bounty)
    }

    pub fn cancel_settlement_by_publisher(&self, bounty_id: Uuid, actor: Uuid) -> Result<Bounty> {
        self.cancel_settlement(bounty_id, actor, Role::Publisher)
    }

    pub fn cancel_settlement_by_receiver(&self, bounty_id: Uuid, actor: Uuid) -> Result<Bounty> {
        self.cancel_settlement(bounty_id, actor, Role::Receiver)
    }

    fn cancel_settlement(&self, bounty_id: Uuid, actor: Uuid, role: Role) -> Result<Bounty> {
        let (bounty, notices) = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            role.check(&bounty, actor, "cancel the settlement")?;
            expect_status(&bounty, BountyStatus::Settling, "cancel settlement of")?;
            let receiver = receiver_of(&bounty)?;

            bounty.status = BountyStatus::Cancelled;
            bounty.payment_status = PaymentStatus::Unpaid;
            bounty.record.touch();
            gw.update_bounty(&bounty)?;

            let title = format!("Settlement of \"{}\" was cancelled", bounty.title);
            let notices = [bounty.publisher_id, receiver]
                .into_iter()
                .map(|recipient| {
                    bounty_notice(
                        NotificationKind::BountyCancelled,
                        recipient,
                        actor,
                        &bounty,
                        title.clone(),
                    )
                    .meta("cancelled_by", actor.to_string())
                })
                .collect::<Vec<_>>();
            Ok((bounty, notices))
        })?;

        info!("Bounty {} cancelled by {:?} {}", bounty_id, role, actor);
        deliver(self.sink.as_ref(), &notices);
        if let Err(e) = self.hooks.charge_cancellation_penalty(&bounty, actor) {
            warn!("Cancellation penalty for bounty {} failed: {}", bounty_id, e);
        }
        Ok(bounty)
    }

    /// Pays the reward out across all approved applications and closes the bounty
    pub fn settle_bounty_accounts(&self, bounty_id: Uuid, actor: Uuid) -> Result<Settlement> {
        let (settlement, notices) = self.store.transaction(|gw| {
            let mut bounty = require_bounty(gw, bounty_id)?;
            Role::Publisher.check(&bounty, actor, "settle the bounty")?;
            expect_status(&bounty, BountyStatus::Settling, "settle")?;
            if bounty.payment_status != PaymentStatus::Pending {
                return Err(MarketError::InvalidStateTransition(format!(
                    "payment of bounty {} is {}, not pending",
                    bounty_id, bounty.payment_status
                )));
            }

            let approved = gw.applications_for_bounty(bounty_id, Some(ApplicationStatus::Approved))?;
            if approved.is_empty() {
                return Err(MarketError::NoApprovedApplications);
            }

            let payouts = split_reward(bounty.reward, &approved);
            for payout in &payouts {
                gw.update_application_status(payout.application_id, ApplicationStatus::Settled)?;
            }

            bounty.payment_status = PaymentStatus::Completed;
            bounty.status = BountyStatus::Settled;
            bounty.record.touch();
            gw.update_bounty(&bounty)?;

            let mut notices: Vec<Notice> = payouts
                .iter()
                .map(|payout| {
                    bounty_notice(
                        NotificationKind::SettlementCompleted,
                        payout.user_id,
                        actor,
                        &bounty,
                        format!("You were paid {} for \"{}\"", payout.amount, bounty.title),
                    )
                    .meta("amount", payout.amount)
                    .meta("application_id", payout.application_id.to_string())
                })
                .collect();
            notices.push(
                bounty_notice(
                    NotificationKind::SettlementCompleted,
                    bounty.publisher_id,
                    actor,
                    &bounty,
                    format!("\"{}\" has been settled", bounty.title),
                )
                .meta("payees", payouts.len()),
            );

            Ok((
                Settlement {
                    bounty_id,
                    payouts,
                },
                notices,
            ))
        })?;

        info!(
            "Bounty {} settled: {} paid to {} applicants",
            bounty_id,
            settlement.total(),
            settlement.payouts.len()
        );
        deliver(self.sink.as_ref(), &notices);
        if let Err(e) = self.hooks.disburse(&settlement) {
            warn!("Disbursement for bounty {} failed: {}", bounty_id, e);
        }
        Ok(settlement)
    }
}
