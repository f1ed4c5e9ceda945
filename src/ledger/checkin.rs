use derive_more::{Display, From};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::{self, batch, ticket};

use super::{rollup, Ledger};

/// Outcome of a successful admit or rewind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Checkin {
    pub message: String,
    pub checked_in: u32,
    pub remaining: u32,
}

#[derive(Debug, Display, From)]
pub enum ApplyDeltaError {
    #[display("database error: {_0}")]
    #[from]
    DbError(db::Error),

    #[display("No change requested.")]
    NoChangeRequested,

    #[display("Ticket not found.")]
    TicketNotFound,

    #[display("{_0}")]
    OutOfBounds(OutOfBounds),
}

impl ApplyDeltaError {
    /// Whether the ledger refused the request, as opposed to failing to
    /// process it.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::DbError(_))
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum OutOfBounds {
    #[display("Only {remaining} remaining.")]
    NotEnoughRemaining { requested: u64, remaining: u32 },

    #[display("Cannot rewind {requested}; only {checked_in} already checked in.")]
    NotEnoughCheckedIn { requested: u64, checked_in: u32 },
}

#[derive(Clone, Copy, Debug)]
enum Request {
    Delta(i64),
    AllRemaining,
}

impl Ledger {
    /// Admits (`delta > 0`) or rewinds (`delta < 0`) attendees of a ticket.
    ///
    /// Runs as one transaction holding the ticket's row lock, so concurrent
    /// calls on the same ticket serialize and each sees the rollup left by
    /// the previous one. A rewind revokes or reduces the most recent active
    /// batches first.
    ///
    /// Identical calls are not deduplicated: a double-submitted admit counts
    /// twice when enough slots remain.
    pub async fn apply_delta(
        &self,
        ticket_id: &ticket::Id,
        delta: i64,
        verifier_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Checkin, ApplyDeltaError> {
        if delta == 0 {
            return Err(ApplyDeltaError::NoChangeRequested);
        }
        self.execute(ticket_id, Request::Delta(delta), verifier_id, notes)
            .await
    }

    /// Admits every slot of the ticket that is not checked in yet.
    pub async fn admit_remaining(
        &self,
        ticket_id: &ticket::Id,
        verifier_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Checkin, ApplyDeltaError> {
        self.execute(ticket_id, Request::AllRemaining, verifier_id, notes)
            .await
    }

    async fn execute(
        &self,
        ticket_id: &ticket::Id,
        request: Request,
        verifier_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Checkin, ApplyDeltaError> {
        use ApplyDeltaError as E;

        let mut tx = self.store.begin().await?;

        let ticket = tx.lock_ticket(ticket_id).await?.ok_or_else(|| {
            warn!(ticket = %ticket_id, "check-in for unknown ticket");
            E::TicketNotFound
        })?;
        let active = tx.get_active_batches(ticket_id).await?;

        let purchased = ticket.purchased_count;
        let current = rollup::checked_in(&active);
        let remaining = rollup::remaining(purchased, current);
        let now = OffsetDateTime::now_utc();

        let delta = match request {
            Request::Delta(delta) => delta,
            Request::AllRemaining => i64::from(remaining),
        };

        let (checked_in, message) = if delta > 0 {
            let requested = delta.unsigned_abs();
            let count = match u32::try_from(requested) {
                Ok(count) if count <= remaining => count,
                _ => {
                    let e = OutOfBounds::NotEnoughRemaining {
                        requested,
                        remaining,
                    };
                    warn!(ticket = %ticket_id, "admit rejected: {e}");
                    return Err(E::OutOfBounds(e));
                }
            };

            tx.insert_batch(batch::New {
                ticket: ticket_id.clone(),
                count,
                verifier: verifier_id.map(str::to_owned),
                notes: notes.map(str::to_owned),
            })
            .await?;

            let checked_in = current + count;
            info!(
                ticket = %ticket_id,
                verifier = verifier_id.unwrap_or_default(),
                count,
                checked_in,
                "admitted",
            );
            (
                checked_in,
                format!("Checked in {count}. Now {checked_in}/{purchased}."),
            )
        } else if delta < 0 {
            let requested = delta.unsigned_abs();
            let magnitude = match u32::try_from(requested) {
                Ok(magnitude) if magnitude <= current => magnitude,
                _ => {
                    let e = OutOfBounds::NotEnoughCheckedIn {
                        requested,
                        checked_in: current,
                    };
                    warn!(ticket = %ticket_id, "rewind rejected: {e}");
                    return Err(E::OutOfBounds(e));
                }
            };

            let mut left = magnitude;
            for batch in active {
                if left == 0 {
                    break;
                }
                if batch.count <= left {
                    tx.revoke_batch(batch.id, now, verifier_id.map(str::to_owned))
                        .await?;
                    left -= batch.count;
                } else {
                    tx.reduce_batch(batch.id, batch.count - left).await?;
                    left = 0;
                }
            }

            let checked_in = current - magnitude;
            info!(
                ticket = %ticket_id,
                verifier = verifier_id.unwrap_or_default(),
                count = magnitude,
                checked_in,
                "rewound",
            );
            (
                checked_in,
                format!("Rewound {magnitude}. Now {checked_in}/{purchased}."),
            )
        } else {
            // Only reachable when admitting all remaining of a full ticket.
            let e = OutOfBounds::NotEnoughRemaining {
                requested: 0,
                remaining,
            };
            warn!(ticket = %ticket_id, "admit rejected: {e}");
            return Err(E::OutOfBounds(e));
        };

        tx.touch_ticket(ticket_id, now).await?;
        tx.commit().await?;

        Ok(Checkin {
            message,
            checked_in,
            remaining: rollup::remaining(purchased, checked_in),
        })
    }
}
