use std::error::Error as StdError;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Row,
};

use super::{Client, Count, Error, Session};

#[derive(Clone, Debug, PartialEq)]
pub struct Ticket {
    pub id: Id,
    pub purchaser_name: String,
    pub purchaser_email: String,
    pub purchased_count: u32,
    pub last_updated_at: OffsetDateTime,
}

impl Ticket {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("ticket_id")?,
            purchaser_name: row.try_get("purchaser_name")?,
            purchaser_email: row.try_get("purchaser_email")?,
            purchased_count: row.try_get::<_, Count>("purchased_count")?.0,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }
}

/// External ticket identifier (the purchase transaction id).
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl FromSql<'_> for Id {
    accepts!(TEXT, VARCHAR);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        String::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for Id {
    accepts!(TEXT, VARCHAR);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

/// Attendance across all tickets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Totals {
    pub tickets: u64,
    pub tickets_completed: u64,
    pub purchased: u64,
    pub checked_in: u64,
}

impl Totals {
    pub fn remaining(&self) -> u64 {
        self.purchased.saturating_sub(self.checked_in)
    }
}

/// Builds a `LIKE` pattern matching `text` anywhere, case-folded.
pub(crate) fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Client {
    pub async fn get_ticket_by_id(
        &self,
        id: &Id,
    ) -> Result<Option<Ticket>, Error> {
        const SQL: &str = "\
            SELECT ticket_id, purchaser_name, purchaser_email, \
                   purchased_count, last_updated_at \
            FROM tickets \
            WHERE ticket_id = $1";
        let client = self.pool.get().await?;
        let row = client.query_opt(SQL, &[id]).await?;
        Ok(row.as_ref().map(Ticket::from_row).transpose()?)
    }

    pub async fn search_tickets(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Ticket>, Error> {
        const SQL: &str = "\
            SELECT ticket_id, purchaser_name, purchaser_email, \
                   purchased_count, last_updated_at \
            FROM tickets \
            WHERE LOWER(purchaser_name) LIKE $1 \
               OR LOWER(purchaser_email) LIKE $1 \
            ORDER BY LOWER(purchaser_name) COLLATE \"C\" ASC, \
                     ticket_id COLLATE \"C\" ASC \
            LIMIT $2";

        let pattern = like_pattern(text);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let client = self.pool.get().await?;
        let rows = client.query(SQL, &[&pattern, &limit]).await?;
        Ok(rows.iter().map(Ticket::from_row).collect::<Result<_, _>>()?)
    }

    pub async fn write_ticket(&self, ticket: &Ticket) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO tickets (ticket_id, purchaser_name, purchaser_email, \
                                 purchased_count, last_updated_at) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (ticket_id) DO UPDATE \
            SET purchaser_name = EXCLUDED.purchaser_name, \
                purchaser_email = EXCLUDED.purchaser_email, \
                purchased_count = EXCLUDED.purchased_count, \
                last_updated_at = EXCLUDED.last_updated_at";

        let client = self.pool.get().await?;
        client
            .execute(
                SQL,
                &[
                    &ticket.id,
                    &ticket.purchaser_name,
                    &ticket.purchaser_email,
                    &Count(ticket.purchased_count),
                    &ticket.last_updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_totals(&self) -> Result<Totals, Error> {
        const SQL: &str = "\
            WITH rollup AS ( \
                SELECT ticket_id, SUM(count) AS checked_in \
                FROM checkin_batches \
                WHERE NOT revoked \
                GROUP BY ticket_id \
            ) \
            SELECT COUNT(*) AS tickets, \
                   COUNT(*) FILTER ( \
                       WHERE COALESCE(r.checked_in, 0) >= t.purchased_count \
                   ) AS tickets_completed, \
                   COALESCE(SUM(t.purchased_count), 0)::BIGINT AS purchased, \
                   COALESCE(SUM(r.checked_in), 0)::BIGINT AS checked_in \
            FROM tickets t \
            LEFT JOIN rollup r ON r.ticket_id = t.ticket_id";

        let row = self.pool.get().await?.query_one(SQL, &[]).await?;
        let get = |column: &str| -> Result<u64, Error> {
            let n = row.try_get::<_, i64>(column)?;
            Ok(u64::try_from(n).unwrap_or_default())
        };
        Ok(Totals {
            tickets: get("tickets")?,
            tickets_completed: get("tickets_completed")?,
            purchased: get("purchased")?,
            checked_in: get("checked_in")?,
        })
    }
}

impl Session {
    pub async fn lock_ticket(
        &self,
        id: &Id,
    ) -> Result<Option<Ticket>, Error> {
        const SQL: &str = "\
            SELECT ticket_id, purchaser_name, purchaser_email, \
                   purchased_count, last_updated_at \
            FROM tickets \
            WHERE ticket_id = $1 \
            FOR UPDATE";
        let row = self.client.query_opt(SQL, &[id]).await?;
        Ok(row.as_ref().map(Ticket::from_row).transpose()?)
    }

    pub async fn touch_ticket(
        &self,
        id: &Id,
        at: OffsetDateTime,
    ) -> Result<(), Error> {
        const SQL: &str = "\
            UPDATE tickets \
            SET last_updated_at = $2 \
            WHERE ticket_id = $1";
        self.client.execute(SQL, &[id, &at]).await?;
        Ok(())
    }
}
