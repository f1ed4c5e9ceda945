use std::error::Error as StdError;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Row,
};

use super::{ticket, Client, Count, Error, Session};

/// One admission action recorded against a ticket.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub id: Id,
    pub ticket: ticket::Id,
    /// Attendees admitted. Reduced in place by a partial rewind, frozen once
    /// revoked.
    pub count: u32,
    pub verifier: Option<String>,
    pub notes: Option<String>,
    /// Assigned by the store. Ids grow in insertion order, so recency is
    /// judged by id rather than by this clock reading.
    pub created_at: OffsetDateTime,
    pub status: Status,
}

impl Batch {
    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Active)
    }

    /// Attendees this batch currently counts as checked in.
    pub fn contribution(&self) -> u32 {
        match self.status {
            Status::Active => self.count,
            Status::Revoked { .. } => 0,
        }
    }

    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        let created_at = row.try_get("created_at")?;
        let status = if row.try_get::<_, bool>("revoked")? {
            Status::Revoked {
                // `revoked_at` is non-null for revoked rows by table check.
                at: row
                    .try_get::<_, Option<OffsetDateTime>>("revoked_at")?
                    .unwrap_or(created_at),
                by: row.try_get("revoked_by")?,
            }
        } else {
            Status::Active
        };
        Ok(Self {
            id: row.try_get("batch_id")?,
            ticket: row.try_get("ticket_id")?,
            count: row.try_get::<_, Count>("count")?.0,
            verifier: row.try_get("verifier_id")?,
            notes: row.try_get("notes")?,
            created_at,
            status,
        })
    }
}

/// A batch to be inserted. Inserted batches are always active.
#[derive(Clone, Debug)]
pub struct New {
    pub ticket: ticket::Id,
    pub count: u32,
    pub verifier: Option<String>,
    pub notes: Option<String>,
}

impl New {
    pub(crate) fn into_batch(
        self,
        id: Id,
        created_at: OffsetDateTime,
    ) -> Batch {
        Batch {
            id,
            ticket: self.ticket,
            count: self.count,
            verifier: self.verifier,
            notes: self.notes,
            created_at,
            status: Status::Active,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct Id(i64);

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromSql<'_> for Id {
    accepts!(INT8);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        i64::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for Id {
    accepts!(INT8);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Active,

    /// Undone by a rewind. Contributes nothing to the rollup.
    Revoked {
        at: OffsetDateTime,
        by: Option<String>,
    },
}

impl Client {
    pub async fn get_batches(
        &self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error> {
        const SQL: &str = "\
            SELECT batch_id, ticket_id, count, verifier_id, notes, \
                   created_at, revoked, revoked_at, revoked_by \
            FROM checkin_batches \
            WHERE ticket_id = $1 \
            ORDER BY batch_id ASC";
        let client = self.pool.get().await?;
        let rows = client.query(SQL, &[ticket]).await?;
        Ok(rows.iter().map(Batch::from_row).collect::<Result<_, _>>()?)
    }
}

impl Session {
    pub async fn get_active_batches(
        &self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error> {
        const SQL: &str = "\
            SELECT batch_id, ticket_id, count, verifier_id, notes, \
                   created_at, revoked, revoked_at, revoked_by \
            FROM checkin_batches \
            WHERE ticket_id = $1 \
              AND NOT revoked \
            ORDER BY batch_id DESC \
            FOR UPDATE";
        let rows = self.client.query(SQL, &[ticket]).await?;
        Ok(rows.iter().map(Batch::from_row).collect::<Result<_, _>>()?)
    }

    pub async fn insert_batch(&self, batch: New) -> Result<Batch, Error> {
        const SQL: &str = "\
            INSERT INTO checkin_batches (ticket_id, count, verifier_id, \
                                         notes) \
            VALUES ($1, $2, $3, $4) \
            RETURNING batch_id, created_at";

        let row = self
            .client
            .query_one(
                SQL,
                &[
                    &batch.ticket,
                    &Count(batch.count),
                    &batch.verifier,
                    &batch.notes,
                ],
            )
            .await?;
        let id = row.try_get::<_, Id>("batch_id")?;
        let created_at = row.try_get::<_, OffsetDateTime>("created_at")?;
        Ok(batch.into_batch(id, created_at))
    }

    pub async fn revoke_batch(
        &self,
        id: Id,
        at: OffsetDateTime,
        by: Option<String>,
    ) -> Result<(), Error> {
        const SQL: &str = "\
            UPDATE checkin_batches \
            SET revoked = TRUE, \
                revoked_at = $2, \
                revoked_by = $3 \
            WHERE batch_id = $1";
        self.client.execute(SQL, &[&id, &at, &by]).await?;
        Ok(())
    }

    pub async fn reduce_batch(&self, id: Id, count: u32) -> Result<(), Error> {
        const SQL: &str = "\
            UPDATE checkin_batches \
            SET count = $2 \
            WHERE batch_id = $1 \
              AND NOT revoked";
        self.client.execute(SQL, &[&id, &Count(count)]).await?;
        Ok(())
    }
}
