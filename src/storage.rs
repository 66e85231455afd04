//! SQLite storage for the marketplace
//!
//! A single connection sits behind a mutex and every unit of work runs in a
//! `BEGIN IMMEDIATE` transaction, so operations on the same bounty are
//! serialized and a failed step rolls the whole operation back.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::gateway::{Counter, Gateway, Store};
use crate::models::{
    Application, ApplicationStatus, Bounty, BountyFilter, BountyStatus, Comment, Like, Milestone,
    Notification, NotificationKind, PaymentStatus, Rating, RatingSummary, Record, RelatedType,
};

const BUSY_TIMEOUT_SECS: u64 = 5;

const BOUNTY_COLUMNS: &str = "id, publisher_id, receiver_id, title, description, reward, deadline, \
     status, payment_status, likes_count, comments_count, view_count, average_rating, \
     rating_count, created_at, updated_at";

const MILESTONE_COLUMNS: &str =
    "id, bounty_id, title, description, due_date, is_completed, created_at, updated_at";

const APPLICATION_COLUMNS: &str = "id, bounty_id, user_id, status, note, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, actor_id, kind, title, description, related_id, \
     related_type, metadata, is_read, created_at, updated_at";

macro_rules! sql_text_enum {
    ($($name:ty),+ $(,)?) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

sql_text_enum!(
    BountyStatus,
    PaymentStatus,
    ApplicationStatus,
    NotificationKind,
    RelatedType,
);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened SQLite database at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Run embedded migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
            [],
            |row| row.get(0),
        )?;

        if !exists {
            let migration_sql = include_str!("../migrations/001_schema.sql");
            conn.execute_batch(migration_sql)?;
            info!("Applied migration 001_schema");
        }

        Ok(())
    }
}

impl Store for SqliteStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Gateway) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = f(&mut SqliteGateway { conn: &tx });

        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!("Rolling back transaction: {}", e);
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

struct SqliteGateway<'a> {
    conn: &'a Connection,
}

fn record_from_row(row: &Row, id: usize, created: usize, updated: usize) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(id)?,
        created_at: row.get(created)?,
        updated_at: row.get(updated)?,
    })
}

fn bounty_from_row(row: &Row) -> rusqlite::Result<Bounty> {
    Ok(Bounty {
        record: record_from_row(row, 0, 14, 15)?,
        publisher_id: row.get(1)?,
        receiver_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        reward: row.get(5)?,
        deadline: row.get(6)?,
        status: row.get(7)?,
        payment_status: row.get(8)?,
        likes_count: row.get(9)?,
        comments_count: row.get(10)?,
        view_count: row.get(11)?,
        average_rating: row.get(12)?,
        rating_count: row.get(13)?,
    })
}

fn milestone_from_row(row: &Row) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        record: record_from_row(row, 0, 6, 7)?,
        bounty_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        due_date: row.get(4)?,
        is_completed: row.get(5)?,
    })
}

fn application_from_row(row: &Row) -> rusqlite::Result<Application> {
    Ok(Application {
        record: record_from_row(row, 0, 5, 6)?,
        bounty_id: row.get(1)?,
        user_id: row.get(2)?,
        status: row.get(3)?,
        note: row.get(4)?,
    })
}

fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    Ok(Notification {
        record: record_from_row(row, 0, 10, 11)?,
        user_id: row.get(1)?,
        actor_id: row.get(2)?,
        kind: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        related_id: row.get(6)?,
        related_type: row.get(7)?,
        metadata: row.get(8)?,
        is_read: row.get(9)?,
    })
}

impl Gateway for SqliteGateway<'_> {
    // ========================================================================
    // BOUNTIES
    // ========================================================================

    fn insert_bounty(&mut self, bounty: &Bounty) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO bounties ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                BOUNTY_COLUMNS
            ),
            params![
                bounty.record.id,
                bounty.publisher_id,
                bounty.receiver_id,
                bounty.title,
                bounty.description,
                bounty.reward,
                bounty.deadline,
                bounty.status,
                bounty.payment_status,
                bounty.likes_count,
                bounty.comments_count,
                bounty.view_count,
                bounty.average_rating,
                bounty.rating_count,
                bounty.record.created_at,
                bounty.record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_bounty(&mut self, id: Uuid) -> Result<Option<Bounty>> {
        let bounty = self
            .conn
            .query_row(
                &format!("SELECT {} FROM bounties WHERE id = ?1", BOUNTY_COLUMNS),
                params![id],
                bounty_from_row,
            )
            .optional()?;
        Ok(bounty)
    }

    fn find_bounties(&mut self, filter: &BountyFilter) -> Result<Vec<Bounty>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Box::new(status));
        }
        if let Some(publisher_id) = filter.publisher_id {
            clauses.push("publisher_id = ?");
            values.push(Box::new(publisher_id));
        }
        if let Some(receiver_id) = filter.receiver_id {
            clauses.push("receiver_id = ?");
            values.push(Box::new(receiver_id));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        // LIMIT -1 means unbounded in SQLite
        values.push(Box::new(filter.limit.map_or(-1, i64::from)));
        values.push(Box::new(i64::from(filter.offset.unwrap_or(0))));

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bounties {} ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
            BOUNTY_COLUMNS, where_clause
        ))?;
        let bounties = stmt
            .query_map(params_from_iter(values.iter()), bounty_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bounties)
    }

    fn update_bounty(&mut self, bounty: &Bounty) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE bounties SET receiver_id = ?2, title = ?3, description = ?4, reward = ?5,
                deadline = ?6, status = ?7, payment_status = ?8, average_rating = ?9,
                rating_count = ?10, updated_at = ?11
             WHERE id = ?1",
            params![
                bounty.record.id,
                bounty.receiver_id,
                bounty.title,
                bounty.description,
                bounty.reward,
                bounty.deadline,
                bounty.status,
                bounty.payment_status,
                bounty.average_rating,
                bounty.rating_count,
                Utc::now(),
            ],
        )?;
        if changed == 0 {
            return Err(MarketError::not_found("bounty", bounty.record.id));
        }
        Ok(())
    }

    fn delete_bounty(&mut self, id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM bounties WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn adjust_counter(&mut self, bounty_id: Uuid, counter: Counter, delta: i64) -> Result<()> {
        let column = counter.column();
        let changed = self.conn.execute(
            &format!(
                "UPDATE bounties SET {} = {} + ?1 WHERE id = ?2",
                column, column
            ),
            params![delta, bounty_id],
        )?;
        if changed == 0 {
            return Err(MarketError::not_found("bounty", bounty_id));
        }
        Ok(())
    }

    // ========================================================================
    // MILESTONES
    // ========================================================================

    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO milestones ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                MILESTONE_COLUMNS
            ),
            params![
                milestone.record.id,
                milestone.bounty_id,
                milestone.title,
                milestone.description,
                milestone.due_date,
                milestone.is_completed,
                milestone.record.created_at,
                milestone.record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_milestone(&mut self, id: Uuid) -> Result<Option<Milestone>> {
        let milestone = self
            .conn
            .query_row(
                &format!("SELECT {} FROM milestones WHERE id = ?1", MILESTONE_COLUMNS),
                params![id],
                milestone_from_row,
            )
            .optional()?;
        Ok(milestone)
    }

    fn milestones_for_bounty(&mut self, bounty_id: Uuid) -> Result<Vec<Milestone>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM milestones WHERE bounty_id = ?1 ORDER BY due_date ASC, id ASC",
            MILESTONE_COLUMNS
        ))?;
        let milestones = stmt
            .query_map(params![bounty_id], milestone_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(milestones)
    }

    fn update_milestone(&mut self, milestone: &Milestone) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE milestones SET title = ?2, description = ?3, due_date = ?4,
                is_completed = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                milestone.record.id,
                milestone.title,
                milestone.description,
                milestone.due_date,
                milestone.is_completed,
                Utc::now(),
            ],
        )?;
        if changed == 0 {
            return Err(MarketError::not_found("milestone", milestone.record.id));
        }
        Ok(())
    }

    fn delete_milestone(&mut self, id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM milestones WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn complete_milestones(&mut self, bounty_id: Uuid) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE milestones SET is_completed = 1, updated_at = ?2
             WHERE bounty_id = ?1 AND is_completed = 0",
            params![bounty_id, Utc::now()],
        )?;
        Ok(changed)
    }

    // ========================================================================
    // APPLICATIONS
    // ========================================================================

    fn insert_application(&mut self, application: &Application) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO applications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                APPLICATION_COLUMNS
            ),
            params![
                application.record.id,
                application.bounty_id,
                application.user_id,
                application.status,
                application.note,
                application.record.created_at,
                application.record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_application(&mut self, id: Uuid) -> Result<Option<Application>> {
        let application = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM applications WHERE id = ?1",
                    APPLICATION_COLUMNS
                ),
                params![id],
                application_from_row,
            )
            .optional()?;
        Ok(application)
    }

    fn applications_for_bounty(
        &mut self,
        bounty_id: Uuid,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM applications
             WHERE bounty_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at ASC, id ASC",
            APPLICATION_COLUMNS
        ))?;
        let applications = stmt
            .query_map(params![bounty_id, status], application_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(applications)
    }

    fn update_application_status(&mut self, id: Uuid, status: ApplicationStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, Utc::now()],
        )?;
        if changed == 0 {
            return Err(MarketError::not_found("application", id));
        }
        Ok(())
    }

    fn reject_pending_applications(
        &mut self,
        bounty_id: Uuid,
        keep: Uuid,
    ) -> Result<Vec<Application>> {
        let mut pending = self.applications_for_bounty(bounty_id, Some(ApplicationStatus::Pending))?;
        pending.retain(|a| a.record.id != keep);

        let now = Utc::now();
        self.conn.execute(
            "UPDATE applications SET status = ?3, updated_at = ?4
             WHERE bounty_id = ?1 AND id != ?2 AND status = ?5",
            params![
                bounty_id,
                keep,
                ApplicationStatus::Rejected,
                now,
                ApplicationStatus::Pending
            ],
        )?;

        for application in &mut pending {
            application.status = ApplicationStatus::Rejected;
            application.record.updated_at = now;
        }
        Ok(pending)
    }

    fn has_active_application(&mut self, bounty_id: Uuid, user_id: Uuid) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM applications
                WHERE bounty_id = ?1 AND user_id = ?2 AND status IN (?3, ?4))",
            params![
                bounty_id,
                user_id,
                ApplicationStatus::Pending,
                ApplicationStatus::Approved
            ],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ========================================================================
    // LIKES / RATINGS / COMMENTS
    // ========================================================================

    fn insert_like(&mut self, like: &Like) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO likes (id, user_id, bounty_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                like.record.id,
                like.user_id,
                like.bounty_id,
                like.record.created_at,
                like.record.updated_at,
            ],
        )?;
        Ok(changed == 1)
    }

    fn delete_like(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM likes WHERE user_id = ?1 AND bounty_id = ?2",
            params![user_id, bounty_id],
        )?;
        Ok(changed > 0)
    }

    fn like_exists(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM likes WHERE user_id = ?1 AND bounty_id = ?2)",
            params![user_id, bounty_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn upsert_rating(&mut self, rating: &Rating) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ratings (id, user_id, bounty_id, score, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (user_id, bounty_id)
             DO UPDATE SET score = excluded.score, updated_at = excluded.updated_at",
            params![
                rating.record.id,
                rating.user_id,
                rating.bounty_id,
                rating.score,
                rating.record.created_at,
                rating.record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_rating(&mut self, user_id: Uuid, bounty_id: Uuid) -> Result<Option<Rating>> {
        let rating = self
            .conn
            .query_row(
                "SELECT id, user_id, bounty_id, score, created_at, updated_at
                 FROM ratings WHERE user_id = ?1 AND bounty_id = ?2",
                params![user_id, bounty_id],
                |row| {
                    Ok(Rating {
                        record: record_from_row(row, 0, 4, 5)?,
                        user_id: row.get(1)?,
                        bounty_id: row.get(2)?,
                        score: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(rating)
    }

    fn rating_summary(&mut self, bounty_id: Uuid) -> Result<RatingSummary> {
        let summary = self.conn.query_row(
            "SELECT COALESCE(AVG(score), 0), COUNT(*) FROM ratings WHERE bounty_id = ?1",
            params![bounty_id],
            |row| {
                Ok(RatingSummary {
                    average: row.get(0)?,
                    count: row.get(1)?,
                })
            },
        )?;
        Ok(summary)
    }

    fn insert_comment(&mut self, comment: &Comment) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comments (id, user_id, bounty_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                comment.record.id,
                comment.user_id,
                comment.bounty_id,
                comment.content,
                comment.record.created_at,
                comment.record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn comments_for_bounty(&mut self, bounty_id: Uuid) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, bounty_id, content, created_at, updated_at
             FROM comments WHERE bounty_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let comments = stmt
            .query_map(params![bounty_id], |row| {
                Ok(Comment {
                    record: record_from_row(row, 0, 4, 5)?,
                    user_id: row.get(1)?,
                    bounty_id: row.get(2)?,
                    content: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    fn insert_notification(&mut self, notification: &Notification) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                NOTIFICATION_COLUMNS
            ),
            params![
                notification.record.id,
                notification.user_id,
                notification.actor_id,
                notification.kind,
                notification.title,
                notification.description,
                notification.related_id,
                notification.related_type,
                notification.metadata,
                notification.is_read,
                notification.record.created_at,
                notification.record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn notifications_for_user(&mut self, user_id: Uuid) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            NOTIFICATION_COLUMNS
        ))?;
        let notifications = stmt
            .query_map(params![user_id], notification_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    fn mark_notification_read(&mut self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1, updated_at = ?3 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    fn delete_notification(&mut self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_bounty, sample_milestone};

    #[test]
    fn test_storage_in_memory() {
        let store = SqliteStore::in_memory().unwrap();
        let bounty = sample_bounty(Uuid::new_v4(), 300);

        store.transaction(|gw| gw.insert_bounty(&bounty)).unwrap();
        let found = store
            .transaction(|gw| gw.find_bounty(bounty.id()))
            .unwrap()
            .unwrap();
        assert_eq!(found.title, bounty.title);
        assert_eq!(found.status, BountyStatus::Created);
        assert_eq!(found.payment_status, PaymentStatus::Unpaid);
        assert_eq!(found.receiver_id, None);
    }

    #[test]
    fn test_reopen_skips_applied_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.db");
        let bounty = sample_bounty(Uuid::new_v4(), 10);

        {
            let store = SqliteStore::new(&path).unwrap();
            store.transaction(|gw| gw.insert_bounty(&bounty)).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        let found = store.transaction(|gw| gw.find_bounty(bounty.id())).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_error_rolls_back_transaction() {
        let store = SqliteStore::in_memory().unwrap();
        let bounty = sample_bounty(Uuid::new_v4(), 10);

        let result: Result<()> = store.transaction(|gw| {
            gw.insert_bounty(&bounty)?;
            gw.adjust_counter(Uuid::new_v4(), Counter::Likes, 1)
        });
        assert!(matches!(result, Err(MarketError::NotFound(_))));

        let found = store.transaction(|gw| gw.find_bounty(bounty.id())).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_counters_use_atomic_increment() {
        let store = SqliteStore::in_memory().unwrap();
        let bounty = sample_bounty(Uuid::new_v4(), 10);
        store.transaction(|gw| gw.insert_bounty(&bounty)).unwrap();

        store
            .transaction(|gw| {
                gw.adjust_counter(bounty.id(), Counter::Likes, 1)?;
                gw.adjust_counter(bounty.id(), Counter::Likes, 1)?;
                gw.adjust_counter(bounty.id(), Counter::Comments, 1)?;
                // A stale full-row update must not clobber the counters
                gw.update_bounty(&bounty)
            })
            .unwrap();

        let found = store
            .transaction(|gw| gw.find_bounty(bounty.id()))
            .unwrap()
            .unwrap();
        assert_eq!(found.likes_count, 2);
        assert_eq!(found.comments_count, 1);
    }

    #[test]
    fn test_filter_and_paging() {
        let store = SqliteStore::in_memory().unwrap();
        let publisher = Uuid::new_v4();
        let other = Uuid::new_v4();

        store
            .transaction(|gw| {
                for _ in 0..3 {
                    gw.insert_bounty(&sample_bounty(publisher, 10))?;
                }
                gw.insert_bounty(&sample_bounty(other, 10))
            })
            .unwrap();

        let mine = store
            .transaction(|gw| {
                gw.find_bounties(&BountyFilter {
                    publisher_id: Some(publisher),
                    ..Default::default()
                })
            })
            .unwrap();
        assert_eq!(mine.len(), 3);

        let page = store
            .transaction(|gw| {
                gw.find_bounties(&BountyFilter {
                    limit: Some(2),
                    offset: Some(3),
                    ..Default::default()
                })
            })
            .unwrap();
        assert_eq!(page.len(), 1);

        let settled = store
            .transaction(|gw| {
                gw.find_bounties(&BountyFilter {
                    status: Some(BountyStatus::Settled),
                    ..Default::default()
                })
            })
            .unwrap();
        assert!(settled.is_empty());
    }

    #[test]
    fn test_delete_bounty_cascades() {
        let store = SqliteStore::in_memory().unwrap();
        let bounty = sample_bounty(Uuid::new_v4(), 10);
        let milestone = sample_milestone(bounty.id());
        let user = Uuid::new_v4();

        store
            .transaction(|gw| {
                gw.insert_bounty(&bounty)?;
                gw.insert_milestone(&milestone)?;
                gw.insert_like(&Like::new(user, bounty.id()))?;
                gw.insert_application(&Application::new(bounty.id(), user, None))
            })
            .unwrap();

        assert!(store.transaction(|gw| gw.delete_bounty(bounty.id())).unwrap());
        assert!(store
            .transaction(|gw| gw.find_milestone(milestone.id()))
            .unwrap()
            .is_none());
        assert!(!store
            .transaction(|gw| gw.like_exists(user, bounty.id()))
            .unwrap());
        assert!(store
            .transaction(|gw| gw.applications_for_bounty(bounty.id(), None))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rating_upsert_keeps_one_row() {
        let store = SqliteStore::in_memory().unwrap();
        let bounty = sample_bounty(Uuid::new_v4(), 10);
        let user = Uuid::new_v4();

        store
            .transaction(|gw| {
                gw.insert_bounty(&bounty)?;
                gw.upsert_rating(&Rating::new(user, bounty.id(), 2.0))?;
                gw.upsert_rating(&Rating::new(user, bounty.id(), 4.0))
            })
            .unwrap();

        let summary = store
            .transaction(|gw| gw.rating_summary(bounty.id()))
            .unwrap();
        assert_eq!(summary.count, 1);
        assert!((summary.average - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_like_is_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let bounty = sample_bounty(Uuid::new_v4(), 10);
        let user = Uuid::new_v4();

        let (first, second) = store
            .transaction(|gw| {
                gw.insert_bounty(&bounty)?;
                let first = gw.insert_like(&Like::new(user, bounty.id()))?;
                let second = gw.insert_like(&Like::new(user, bounty.id()))?;
                Ok((first, second))
            })
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn test_notification_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let user = Uuid::new_v4();
        let notification = Notification {
            record: Record::new(),
            user_id: user,
            actor_id: None,
            kind: NotificationKind::BountyLiked,
            title: "liked".into(),
            description: String::new(),
            related_id: Some(Uuid::new_v4()),
            related_type: Some(RelatedType::Bounty),
            metadata: serde_json::json!({ "k": 1 }),
            is_read: false,
        };

        store
            .transaction(|gw| gw.insert_notification(&notification))
            .unwrap();
        assert!(store
            .transaction(|gw| gw.mark_notification_read(notification.record.id, user))
            .unwrap());

        let listed = store
            .transaction(|gw| gw.notifications_for_user(user))
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_read);
        assert_eq!(listed[0].kind, NotificationKind::BountyLiked);
        assert_eq!(listed[0].metadata["k"], 1);
    }
}
