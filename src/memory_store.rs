//! In-memory store
//!
//! A transaction works on a copy of the whole state; the copy replaces the
//! live state only when the closure succeeds. The state lock is held for the
//! duration of the transaction, so transactions are serialized.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::gateway::{Counter, Gateway, Store};
use crate::models::{
    Application, ApplicationStatus, Bounty, BountyFilter, Comment, Like, Milestone, Notification,
    Rating, RatingSummary,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    bounties: HashMap<Uuid, Bounty>,
    milestones: HashMap<Uuid, Milestone>,
    applications: HashMap<Uuid, Application>,
    likes: HashMap<(Uuid, Uuid), Like>,
    ratings: HashMap<(Uuid, Uuid), Rating>,
    comments: Vec<Comment>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fault: Mutex<Option<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of the named gateway method fail with a storage error
    pub fn inject_fault(&self, operation: &'static str) {
        *self.fault.lock() = Some(operation);
    }
}

impl Store for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Gateway) -> Result<T>,
    {
        let mut state = self.state.lock();
        let mut fault = self.fault.lock().take();
        let mut working = state.clone();

        let result = f(&mut MemoryGateway {
            state: &mut working,
            fault: &mut fault,
        });

        if fault.is_some() {
            *self.fault.lock() = fault;
        }
        if result.is_ok() {
            *state = working;
        }
        result
    }
}

struct MemoryGateway<'a> {
    state: &'a mut MemoryState,
    fault: &'a mut Option<&'static str>,
}

impl MemoryGateway<'_> {
    fn check(&mut self, operation: &'static str) -> Result<()> {
        if *self.fault == Some(operation) {
            *self.fault = None;
            return Err(MarketError::Storage(format!(
                "injected fault in {}",
                operation
            )));
        }
        Ok(())
    }
}

impl Gateway for MemoryGateway<'_> {
    fn insert_bounty(&mut self, bounty: &Bounty) -> Result<()> {
        self.check("insert_bounty")?;
        self.state.bounties.insert(bounty.id(), bounty.clone());
        Ok(())
    }

    fn find_bounty(&mut self, id: Uuid) -> Result<Option<Bounty>> {
        self.check("find_bounty")?;
        Ok(self.state.bounties.get(&id).cloned())
    }

    fn find_bounties(&mut self, filter: &BountyFilter) -> Result<Vec<Bounty>> {
        self.check("find_bounties")?;
        let mut bounties: Vec<Bounty> = self
            .state
            .bounties
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        bounties.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| a.id().cmp(&b.id()))
        });

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(bounties.into_iter().skip(offset).take(limit).collect())
    }

    fn update_bounty(&mut self, bounty: &Bounty) -> Result<()> {
        self.check("update_bounty")?;
        let stored = self
            .state
            .bounties
            .get_mut(&bounty.id())
            .ok_or_else(|| MarketError::not_found("bounty", bounty.id()))?;

        let (likes, comments, views) =
            (stored.likes_count, stored.comments_count, stored.view_count);
        *stored = bounty.clone();
        stored.likes_count = likes;
        stored.comments_count = comments;
        stored.view_count = views;
        Ok(())
    }

    fn delete_bounty(&mut self, id: Uuid) -> Result<bool> {
        self.check("delete_bounty")?;
        if self.state.bounties.remove(&id).is_none() {
            return Ok(false);
        }
        self.state.milestones.retain(|_, m| m.bounty_id != id);
        self.state.applications.retain(|_, a| a.bounty_id != id);
        self.state.likes.retain(|(_, bounty_id), _| *bounty_id != id);
        self.state.ratings.retain(|(_, bounty_id), _| *bounty_id != id);
        self.state.comments.retain(|c| c.bounty_id != id);
        Ok(true)
    }

    fn adjust_counter(&mut self, bounty_id: Uuid, counter: Counter, delta: i64) -> Result<()> {
        self.check("adjust_counter")?;
        let bounty = self
            .state
            .bounties
            .get_mut(&bounty_id)
            .ok_or_else(|| MarketError::not_found("bounty", bounty_id))?;
        match counter {
            Counter::Likes => bounty.likes_count += delta,
            Counter::Comments => bounty.comments_count += delta,
            Counter::Views => bounty.view_count += delta,
        }
        Ok(())
    }

    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<()> {
        self.check("insert_milestone")?;
        self.state
            .milestones
            .insert(milestone.id(), milestone.clone());
        Ok(())
    }

    fn find_milestone(&mut self, id: Uuid) -> Result<Option<Milestone>> {
        self.check("find_milestone")?;
        Ok(self.state.milestones.get(&id).cloned())
    }

    fn milestones_for_bounty(&mut self, bounty_id: Uuid) -> Result<Vec<Milestone>> {
        self.check("milestones_for_bounty")?;
        let mut milestones: Vec<Milestone> = self
            .state
            .milestones
            .values()
            .filter(|m| m.bounty_id == bounty_id)
            .cloned()
            .collect();
        milestones.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id().cmp(&b.id())));
        Ok(milestones)
    }

    fn update_milestone(&mut self, milestone: &Milestone) -> Result<()> {
        self.check("update_milestone")?;
        let stored = self
            .state
            .milestones
            .get_mut(&milestone.id())
            .ok_or_else(|| MarketError::not_found("milestone", milestone.id()))?;
        *stored = milestone.clone();
        Ok(())
    }

    fn delete_milestone(&mut self, id: Uuid) -> Result<bool> {
        self.check("delete_milestone")?;
        Ok(self.state.milestones.remove(&id).is_some())
    }

    fn complete_milestones(&mut self, bounty_id: Uuid) -> Result<usize> {
        self.check("complete_milestones")?;
        let mut flipped = 0;
        for milestone in self.state.milestones.values_mut() {
            if milestone.bounty_id == bounty_id && !milestone.is_completed {
                milestone.is_completed = true;
                milestone.record.touch();
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    fn insert_application(&mut self, application: &Application) -> Result<()> {
        self.check("insert_application")?;
        self.state
            .applications
            .insert(application.id(), application.clone());
        Ok(())
    }

    fn find_application(&mut self, id: Uuid) -> Result<Option<Application>> {
        self.check("find_application")?;
        Ok(self.state.applications.get(&id).cloned())
    }

    fn applications_for_bounty(
        &mut self,
        bounty_id: Uuid,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>> {
        self.check("applications_for_bounty")?;
        let mut applications: Vec<Application> = self
            .state
            .applications
            .values()
            .filter(|a| a.bounty_id == bounty_id && status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        applications.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(applications)
    }

    fn update_application_status(&mut self, id: Uuid, status: ApplicationStatus) -> Result<()> {
        self.check("update_application_status")?;
        let application = self
            .state
            .applications
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("application", id))?;
        application.status = status;
        application.record.touch();
        Ok(())
    }

    fn reject_pending_applications(
        &mut self,
        bounty_id: Uuid,
        keep: Uuid,
    ) -> Result<Vec<Application>> {
        self.check("reject_pending_applications")?;
        let mut rejected = Vec::new();
        for application in self.state.applications.values_mut() {
            if application.bounty_id == bounty_id
                && application.id() != keep
                && application.status == ApplicationStatus::Pending
            {
                application.status = ApplicationStatus::Rejected;
                application.record.touch();
                rejected.push(application.clone());
            }
        }
        Ok(rejected)
    }

    fn has_active_application(&mut self, bounty_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.check("has_active_application")?;
        Ok(self.state.applications.values().any(|a| {
            a.bounty_id == bounty_id && a.user_id == user_id && a.status.is_active()
        }))
    }

    fn insert_like(&mut self, like: &Like) -> Result<bool> {
        self.check("insert_like")?;
        let key = (like.user_id, like.bounty_id);
        if self.state.likes.contains_key(&key) {
            return Ok(false);
        }
        self.state.likes.insert(key, like.clone());
        Ok(true)
    }

    fn delete_like(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<bool> {
        self.check("delete_like")?;
        Ok(self.state.likes.remove(&(user_id, bounty_id)).is_some())
    }

    fn like_exists(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<bool> {
        self.check("like_exists")?;
        Ok(self.state.likes.contains_key(&(user_id, bounty_id)))
    }

    fn upsert_rating(&mut self, rating: &Rating) -> Result<()> {
        self.check("upsert_rating")?;
        self.state
            .ratings
            .entry((rating.user_id, rating.bounty_id))
            .and_modify(|existing| {
                existing.score = rating.score;
                existing.record.touch();
            })
            .or_insert_with(|| rating.clone());
        Ok(())
    }

    fn find_rating(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<Option<Rating>> {
        self.check("find_rating")?;
        Ok(self.state.ratings.get(&(user_id, bounty_id)).cloned())
    }

    fn rating_summary(&mut self, bounty_id: Uuid) -> Result<RatingSummary> {
        self.check("rating_summary")?;
        let scores: Vec<f64> = self
            .state
            .ratings
            .values()
            .filter(|r| r.bounty_id == bounty_id)
            .map(|r| r.score)
            .collect();
        if scores.is_empty() {
            return Ok(RatingSummary::default());
        }
        Ok(RatingSummary {
            average: scores.iter().sum::<f64>() / scores.len() as f64,
            count: scores.len() as i64,
        })
    }

    fn insert_comment(&mut self, comment: &Comment) -> Result<()> {
        self.check("insert_comment")?;
        self.state.comments.push(comment.clone());
        Ok(())
    }

    fn comments_for_bounty(&mut self, bounty_id: Uuid) -> Result<Vec<Comment>> {
        self.check("comments_for_bounty")?;
        // Pushed in creation order, so reversing yields newest first
        Ok(self
            .state
            .comments
            .iter()
            .rev()
            .filter(|c| c.bounty_id == bounty_id)
            .cloned()
            .collect())
    }

    fn insert_notification(&mut self, notification: &Notification) -> Result<()> {
        self.check("insert_notification")?;
        self.state.notifications.push(notification.clone());
        Ok(())
    }

    fn notifications_for_user(&mut self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.check("notifications_for_user")?;
        Ok(self
            .state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    fn mark_notification_read(&mut self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.check("mark_notification_read")?;
        match self
            .state
            .notifications
            .iter_mut()
            .find(|n| n.record.id == id && n.user_id == user_id)
        {
            Some(notification) => {
                notification.is_read = true;
                notification.record.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_notification(&mut self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.check("delete_notification")?;
        let before = self.state.notifications.len();
        self.state
            .notifications
            .retain(|n| !(n.record.id == id && n.user_id == user_id));
        Ok(self.state.notifications.len() != before)
    }
}
