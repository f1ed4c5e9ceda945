use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{api, db, ledger};

pub use crate::db::batch::Id;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Request {
    pub ticket_id: api::ticket::Id,
    /// Attendees to admit when positive, to rewind when negative.
    pub delta: i64,
    #[serde(default)]
    pub verifier_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Response {
    pub message: String,
    pub checked_in: u32,
    pub remaining: u32,
}

impl From<ledger::Checkin> for Response {
    fn from(checkin: ledger::Checkin) -> Self {
        Self {
            message: checkin.message,
            checked_in: checkin.checked_in,
            remaining: checkin.remaining,
        }
    }
}

/// Audit view of a recorded batch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Batch {
    pub batch_id: Id,
    pub count: u32,
    pub verifier_id: Option<String>,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(flatten)]
    pub status: Status,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Status {
    Active,
    Revoked {
        #[serde(with = "time::serde::rfc3339")]
        revoked_at: OffsetDateTime,
        revoked_by: Option<String>,
    },
}

impl From<db::Batch> for Batch {
    fn from(batch: db::Batch) -> Self {
        Self {
            batch_id: batch.id,
            count: batch.count,
            verifier_id: batch.verifier,
            notes: batch.notes,
            created_at: batch.created_at,
            status: match batch.status {
                db::batch::Status::Active => Status::Active,
                db::batch::Status::Revoked { at, by } => Status::Revoked {
                    revoked_at: at,
                    revoked_by: by,
                },
            },
        }
    }
}
