//! Shared fixtures for unit tests

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::ListingConfig;
use crate::gateway::Store;
use crate::market::Marketplace;
use crate::memory_store::MemoryStore;
use crate::models::{Bounty, Milestone, MilestoneInput, NewBounty, NotificationKind};
use crate::notify::{Notice, NotificationSink};
use crate::settlement::{NoopHooks, SettlementHooks};

pub fn new_bounty(reward: i64) -> NewBounty {
    NewBounty {
        title: "Fix the flaky login test".to_string(),
        description: "Login test fails one run in ten".to_string(),
        reward,
        deadline: Utc::now() + Duration::days(14),
    }
}

pub fn sample_bounty(publisher: Uuid, reward: i64) -> Bounty {
    Bounty::new(publisher, new_bounty(reward))
}

pub fn milestone_input(title: &str) -> MilestoneInput {
    MilestoneInput {
        title: title.to_string(),
        description: String::new(),
        due_date: Utc::now() + Duration::days(7),
    }
}

pub fn sample_milestone(bounty_id: Uuid) -> Milestone {
    Milestone::new(bounty_id, milestone_input("M1"))
}

/// Captures every notice it receives
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notices.lock().iter().map(|n| n.kind).collect()
    }

    pub fn sent_to(&self, user: Uuid) -> Vec<NotificationKind> {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.recipient_id == user)
            .map(|n| n.kind)
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn send(&self, notice: &Notice) -> anyhow::Result<()> {
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

/// Rejects every notice
pub struct FailingSink;

impl NotificationSink for FailingSink {
    fn send(&self, _notice: &Notice) -> anyhow::Result<()> {
        anyhow::bail!("notification backend unavailable")
    }
}

/// Records hook invocations
#[derive(Default)]
pub struct RecordingHooks {
    pub penalties: Mutex<Vec<(Uuid, Uuid)>>,
    pub disbursed: Mutex<Vec<Uuid>>,
}

impl SettlementHooks for RecordingHooks {
    fn charge_cancellation_penalty(&self, bounty: &Bounty, cancelled_by: Uuid) -> anyhow::Result<()> {
        self.penalties.lock().push((bounty.id(), cancelled_by));
        Ok(())
    }

    fn disburse(&self, settlement: &crate::settlement::Settlement) -> anyhow::Result<()> {
        self.disbursed.lock().push(settlement.bounty_id);
        Ok(())
    }
}

pub struct Fixture<S: Store> {
    pub store: Arc<S>,
    pub sink: Arc<RecordingSink>,
    pub market: Marketplace<S>,
    pub publisher: Uuid,
}

pub fn market_with<S: Store>(store: S) -> Fixture<S> {
    let store = Arc::new(store);
    let sink = Arc::new(RecordingSink::default());
    let market = Marketplace::new(
        store.clone(),
        sink.clone(),
        Arc::new(NoopHooks),
        ListingConfig::default(),
    );
    Fixture {
        store,
        sink,
        market,
        publisher: Uuid::new_v4(),
    }
}

pub fn memory_market() -> Fixture<MemoryStore> {
    market_with(MemoryStore::new())
}

/// Bounty published by the fixture publisher with one milestone and `receiver` approved
pub fn assigned_bounty<S: Store>(fixture: &Fixture<S>, reward: i64, receiver: Uuid) -> Bounty {
    let market = &fixture.market;
    let bounty = market
        .settlement
        .create_bounty(fixture.publisher, new_bounty(reward))
        .unwrap();
    market
        .milestones
        .create_milestone(bounty.id(), fixture.publisher, milestone_input("M1"))
        .unwrap();
    let application = market
        .applications
        .create_application(bounty.id(), receiver, None)
        .unwrap();
    market
        .applications
        .approve_application(application.id(), fixture.publisher)
        .unwrap();
    market.settlement.get_bounty(bounty.id()).unwrap()
}
