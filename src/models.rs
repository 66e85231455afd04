//! Marketplace entities and status types
//!
//! Entities carry explicit foreign keys (`bounty_id`, `user_id`, ...) instead of
//! navigable relations; related rows are fetched on demand through the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{MarketError, Result};

/// Highest score a rating may carry
pub const MAX_RATING_SCORE: f64 = 5.0;
/// Lowest score a rating may carry
pub const MIN_RATING_SCORE: f64 = 1.0;

// ============================================================================
// SHARED RECORD FIELDS
// ============================================================================

/// Identity and timestamps embedded in every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// STATUS TYPES
// ============================================================================

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Bounty lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BountyStatus {
    Created,
    MilestonesConfirmed,
    MilestonesVerified,
    Settling,
    Settled,
    Cancelled,
}

text_enum!(BountyStatus, "bounty status", {
    Created => "Created",
    MilestonesConfirmed => "MilestonesConfirmed",
    MilestonesVerified => "MilestonesVerified",
    Settling => "Settling",
    Settled => "Settled",
    Cancelled => "Cancelled",
});

impl BountyStatus {
    /// Statuses in which the bounty must have an assigned receiver
    pub fn requires_receiver(&self) -> bool {
        matches!(
            self,
            Self::MilestonesConfirmed | Self::MilestonesVerified | Self::Settling | Self::Settled
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled)
    }
}

/// Payment axis, independent of the lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Completed,
}

text_enum!(PaymentStatus, "payment status", {
    Unpaid => "unpaid",
    Pending => "pending",
    Completed => "completed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Settled,
}

text_enum!(ApplicationStatus, "application status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Settled => "settled",
});

impl ApplicationStatus {
    /// Pending and approved applications block a new application by the same user
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    BountyApplied,
    ApplicationApproved,
    ApplicationRejected,
    MilestonesSubmitted,
    MilestonesVerified,
    SettlementApplied,
    SettlementCompleted,
    BountyCancelled,
    BountyLiked,
    BountyCommented,
}

text_enum!(NotificationKind, "notification kind", {
    BountyApplied => "BountyApplied",
    ApplicationApproved => "ApplicationApproved",
    ApplicationRejected => "ApplicationRejected",
    MilestonesSubmitted => "MilestonesSubmitted",
    MilestonesVerified => "MilestonesVerified",
    SettlementApplied => "SettlementApplied",
    SettlementCompleted => "SettlementCompleted",
    BountyCancelled => "BountyCancelled",
    BountyLiked => "BountyLiked",
    BountyCommented => "BountyCommented",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelatedType {
    Bounty,
    Application,
    Milestone,
}

text_enum!(RelatedType, "related type", {
    Bounty => "Bounty",
    Application => "Application",
    Milestone => "Milestone",
});

// ============================================================================
// BOUNTY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounty {
    #[serde(flatten)]
    pub record: Record,
    pub publisher_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    /// Reward in minor currency units
    pub reward: i64,
    pub deadline: DateTime<Utc>,
    pub status: BountyStatus,
    pub payment_status: PaymentStatus,
    pub likes_count: i64,
    pub comments_count: i64,
    pub view_count: i64,
    pub average_rating: f64,
    pub rating_count: i64,
}

impl Bounty {
    pub fn new(publisher_id: Uuid, input: NewBounty) -> Self {
        Self {
            record: Record::new(),
            publisher_id,
            receiver_id: None,
            title: input.title,
            description: input.description,
            reward: input.reward,
            deadline: input.deadline,
            status: BountyStatus::Created,
            payment_status: PaymentStatus::Unpaid,
            likes_count: 0,
            comments_count: 0,
            view_count: 0,
            average_rating: 0.0,
            rating_count: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    /// A receiver has been chosen through an approved application
    pub fn is_assigned(&self) -> bool {
        self.receiver_id.is_some()
    }

    pub fn is_publisher(&self, user_id: Uuid) -> bool {
        self.publisher_id == user_id
    }

    pub fn is_receiver(&self, user_id: Uuid) -> bool {
        self.receiver_id == Some(user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBounty {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reward: i64,
    pub deadline: DateTime<Utc>,
}

impl NewBounty {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(MarketError::Validation("title must not be empty".into()));
        }
        if self.reward <= 0 {
            return Err(MarketError::Validation("reward must be positive".into()));
        }
        Ok(())
    }
}

/// Publisher edits to an unassigned bounty; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BountyUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub reward: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
}

impl BountyUpdate {
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            return Err(MarketError::Validation("title must not be empty".into()));
        }
        if matches!(self.reward, Some(r) if r <= 0) {
            return Err(MarketError::Validation("reward must be positive".into()));
        }
        Ok(())
    }

    pub fn apply_to(self, bounty: &mut Bounty) {
        if let Some(title) = self.title {
            bounty.title = title;
        }
        if let Some(description) = self.description {
            bounty.description = description;
        }
        if let Some(reward) = self.reward {
            bounty.reward = reward;
        }
        if let Some(deadline) = self.deadline {
            bounty.deadline = deadline;
        }
    }
}

/// Filtered bounty listing, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BountyFilter {
    pub status: Option<BountyStatus>,
    pub publisher_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl BountyFilter {
    pub fn matches(&self, bounty: &Bounty) -> bool {
        self.status.map_or(true, |s| bounty.status == s)
            && self.publisher_id.map_or(true, |p| bounty.publisher_id == p)
            && self.receiver_id.map_or(true, |r| bounty.receiver_id == Some(r))
    }
}

// ============================================================================
// MILESTONES AND APPLICATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(flatten)]
    pub record: Record,
    pub bounty_id: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub is_completed: bool,
}

impl Milestone {
    pub fn new(bounty_id: Uuid, input: MilestoneInput) -> Self {
        Self {
            record: Record::new(),
            bounty_id,
            title: input.title,
            description: input.description,
            due_date: input.due_date,
            is_completed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }
}

/// Publisher-editable milestone fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: DateTime<Utc>,
}

impl MilestoneInput {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(MarketError::Validation(
                "milestone title must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(flatten)]
    pub record: Record,
    pub bounty_id: Uuid,
    pub user_id: Uuid,
    pub status: ApplicationStatus,
    pub note: Option<String>,
}

impl Application {
    pub fn new(bounty_id: Uuid, user_id: Uuid, note: Option<String>) -> Self {
        Self {
            record: Record::new(),
            bounty_id,
            user_id,
            status: ApplicationStatus::Pending,
            note,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }
}

// ============================================================================
// INTERACTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Like {
    #[serde(flatten)]
    pub record: Record,
    pub user_id: Uuid,
    pub bounty_id: Uuid,
}

impl Like {
    pub fn new(user_id: Uuid, bounty_id: Uuid) -> Self {
        Self {
            record: Record::new(),
            user_id,
            bounty_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    #[serde(flatten)]
    pub record: Record,
    pub user_id: Uuid,
    pub bounty_id: Uuid,
    pub score: f64,
}

impl Rating {
    pub fn new(user_id: Uuid, bounty_id: Uuid, score: f64) -> Self {
        Self {
            record: Record::new(),
            user_id,
            bounty_id,
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(flatten)]
    pub record: Record,
    pub user_id: Uuid,
    pub bounty_id: Uuid,
    pub content: String,
}

impl Comment {
    pub fn new(user_id: Uuid, bounty_id: Uuid, content: String) -> Self {
        Self {
            record: Record::new(),
            user_id,
            bounty_id,
            content,
        }
    }
}

/// Aggregate over all ratings of one bounty
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatingSummary {
    pub average: f64,
    pub count: i64,
}

/// What a single user has done to a bounty
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BountyInteraction {
    pub liked: bool,
    /// 0.0 when the user never rated the bounty
    pub score: f64,
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub record: Record,
    pub user_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<RelatedType>,
    pub metadata: serde_json::Value,
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_roundtrip() {
        for status in [
            BountyStatus::Created,
            BountyStatus::MilestonesConfirmed,
            BountyStatus::MilestonesVerified,
            BountyStatus::Settling,
            BountyStatus::Settled,
            BountyStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BountyStatus>().unwrap(), status);
        }
        assert!("assigned".parse::<BountyStatus>().is_err());
        assert!("paid".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_serde_names_match_text() {
        let json = serde_json::to_string(&PaymentStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let json = serde_json::to_string(&BountyStatus::MilestonesVerified).unwrap();
        assert_eq!(json, "\"MilestonesVerified\"");
        let json = serde_json::to_string(&ApplicationStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
    }

    #[test]
    fn test_receiver_required_statuses() {
        assert!(!BountyStatus::Created.requires_receiver());
        assert!(BountyStatus::Settling.requires_receiver());
        assert!(!BountyStatus::Cancelled.requires_receiver());
        assert!(BountyStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_bounty_validation() {
        let mut input = NewBounty {
            title: "Fix login".into(),
            description: String::new(),
            reward: 100,
            deadline: Utc::now(),
        };
        assert!(input.validate().is_ok());

        input.reward = 0;
        assert!(matches!(input.validate(), Err(MarketError::Validation(_))));

        input.reward = 10;
        input.title = "   ".into();
        assert!(matches!(input.validate(), Err(MarketError::Validation(_))));
    }

    #[test]
    fn test_bounty_serializes_flat_record() {
        let bounty = Bounty::new(
            Uuid::new_v4(),
            NewBounty {
                title: "t".into(),
                description: "d".into(),
                reward: 5,
                deadline: Utc::now(),
            },
        );
        let value = serde_json::to_value(&bounty).unwrap();
        assert_eq!(value["id"], serde_json::json!(bounty.id()));
        assert_eq!(value["status"], "Created");
        assert_eq!(value["payment_status"], "unpaid");
    }

    #[test]
    fn test_filter_matches() {
        let publisher = Uuid::new_v4();
        let bounty = Bounty::new(
            publisher,
            NewBounty {
                title: "t".into(),
                description: String::new(),
                reward: 5,
                deadline: Utc::now(),
            },
        );
        let filter = BountyFilter {
            publisher_id: Some(publisher),
            status: Some(BountyStatus::Created),
            ..Default::default()
        };
        assert!(filter.matches(&bounty));

        let filter = BountyFilter {
            receiver_id: Some(publisher),
            ..Default::default()
        };
        assert!(!filter.matches(&bounty));
    }
}
