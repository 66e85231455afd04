//! Persistence gateway contract
//!
//! `Gateway` is the per-entity CRUD surface a component sees while it holds a
//! transaction. `Store` owns the storage engine and runs a closure against a
//! gateway as one unit of work: `Ok` commits, `Err` rolls everything back.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::models::{
    Application, ApplicationStatus, Bounty, BountyFilter, Comment, Like, Milestone, Notification,
    Rating, RatingSummary,
};

/// Denormalized bounty counters, only ever changed by atomic increments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Comments,
    Views,
}

impl Counter {
    pub fn column(&self) -> &'static str {
        match self {
            Counter::Likes => "likes_count",
            Counter::Comments => "comments_count",
            Counter::Views => "view_count",
        }
    }
}

pub trait Gateway {
    // Bounties
    fn insert_bounty(&mut self, bounty: &Bounty) -> Result<()>;
    fn find_bounty(&mut self, id: Uuid) -> Result<Option<Bounty>>;
    /// Newest first; `limit`/`offset` are applied when set
    fn find_bounties(&mut self, filter: &BountyFilter) -> Result<Vec<Bounty>>;
    /// Persists everything except the counters, which belong to `adjust_counter`
    fn update_bounty(&mut self, bounty: &Bounty) -> Result<()>;
    /// Removes the bounty together with its dependent rows
    fn delete_bounty(&mut self, id: Uuid) -> Result<bool>;
    fn adjust_counter(&mut self, bounty_id: Uuid, counter: Counter, delta: i64) -> Result<()>;

    // Milestones
    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<()>;
    fn find_milestone(&mut self, id: Uuid) -> Result<Option<Milestone>>;
    /// Ordered by due date
    fn milestones_for_bounty(&mut self, bounty_id: Uuid) -> Result<Vec<Milestone>>;
    fn update_milestone(&mut self, milestone: &Milestone) -> Result<()>;
    fn delete_milestone(&mut self, id: Uuid) -> Result<bool>;
    /// Flags every incomplete milestone of the bounty as completed, returns how many flipped
    fn complete_milestones(&mut self, bounty_id: Uuid) -> Result<usize>;

    // Applications
    fn insert_application(&mut self, application: &Application) -> Result<()>;
    fn find_application(&mut self, id: Uuid) -> Result<Option<Application>>;
    /// Oldest first, optionally restricted to one status
    fn applications_for_bounty(
        &mut self,
        bounty_id: Uuid,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>>;
    fn update_application_status(&mut self, id: Uuid, status: ApplicationStatus) -> Result<()>;
    /// Rejects every pending application of the bounty except `keep`, returning the rejected rows
    fn reject_pending_applications(&mut self, bounty_id: Uuid, keep: Uuid)
        -> Result<Vec<Application>>;
    fn has_active_application(&mut self, bounty_id: Uuid, user_id: Uuid) -> Result<bool>;

    // Likes
    /// Returns false when the (user, bounty) pair already has a like
    fn insert_like(&mut self, like: &Like) -> Result<bool>;
    fn delete_like(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<bool>;
    fn like_exists(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<bool>;

    // Ratings
    /// Inserts or overwrites the score of the (user, bounty) rating
    fn upsert_rating(&mut self, rating: &Rating) -> Result<()>;
    fn find_rating(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<Option<Rating>>;
    fn rating_summary(&mut self, bounty_id: Uuid) -> Result<RatingSummary>;

    // Comments
    fn insert_comment(&mut self, comment: &Comment) -> Result<()>;
    /// Newest first
    fn comments_for_bounty(&mut self, bounty_id: Uuid) -> Result<Vec<Comment>>;

    // Notifications
    fn insert_notification(&mut self, notification: &Notification) -> Result<()>;
    /// Newest first
    fn notifications_for_user(&mut self, user_id: Uuid) -> Result<Vec<Notification>>;
    fn mark_notification_read(&mut self, id: Uuid, user_id: Uuid) -> Result<bool>;
    fn delete_notification(&mut self, id: Uuid, user_id: Uuid) -> Result<bool>;
}

pub trait Store: Send + Sync {
    /// Runs `f` as a single atomic unit of work
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Gateway) -> Result<T>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Gateway) -> Result<T>,
    {
        (**self).transaction(f)
    }
}

pub fn require_bounty(gw: &mut dyn Gateway, id: Uuid) -> Result<Bounty> {
    gw.find_bounty(id)?
        .ok_or_else(|| MarketError::not_found("bounty", id))
}

pub fn require_application(gw: &mut dyn Gateway, id: Uuid) -> Result<Application> {
    gw.find_application(id)?
        .ok_or_else(|| MarketError::not_found("application", id))
}

pub fn require_milestone(gw: &mut dyn Gateway, id: Uuid) -> Result<Milestone> {
    gw.find_milestone(id)?
        .ok_or_else(|| MarketError::not_found("milestone", id))
}
