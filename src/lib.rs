//! Bounty Market - lifecycle and settlement core for a bounty marketplace
//!
//! Publishers post paid bounties, users apply, one applicant is approved as
//! receiver, work is tracked through milestones and the reward is settled.
//!
//! # How it works
//!
//! 1. A publisher creates a bounty and its milestones
//! 2. Users apply; approving one application assigns the receiver and rejects the rest
//! 3. The receiver confirms the milestones, the publisher verifies them
//! 4. The receiver requests settlement; the publisher settles or either side cancels
//! 5. Anyone can like, rate and comment on a bounty along the way
//!
//! # Consistency
//!
//! - Every operation runs as one transaction through a [`Store`]
//! - Bounty counters only move through atomic increments
//! - Notifications are delivered after commit and never undo a transition

pub mod applications;
pub mod config;
pub mod error;
pub mod gateway;
pub mod interactions;
pub mod market;
pub mod memory_store;
pub mod milestones;
pub mod models;
pub mod notify;
pub mod server;
pub mod settlement;
pub mod storage;

#[cfg(test)]
mod testing;

pub use applications::ApplicationWorkflow;
pub use config::Config;
pub use error::{MarketError, Result};
pub use gateway::{Counter, Gateway, Store};
pub use interactions::InteractionLedger;
pub use market::Marketplace;
pub use memory_store::MemoryStore;
pub use milestones::MilestoneTracker;
pub use notify::{LogSink, Notice, NotificationSink, QueuedSink, StoreSink};
pub use settlement::{NoopHooks, Payout, Settlement, SettlementEngine, SettlementHooks};
pub use storage::SqliteStore;
