use serde::{Deserialize, Serialize};

use crate::{db, ledger};

pub use crate::db::ticket::Id;

/// Ticket as seen by a verifier, with its current admission counts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Summary {
    pub ticket_id: Id,
    pub purchaser_name: String,
    pub purchaser_email: String,
    pub purchased_count: u32,
    pub checked_in: u32,
    pub remaining: u32,
    pub is_full: bool,
}

impl From<ledger::Summary> for Summary {
    fn from(summary: ledger::Summary) -> Self {
        let is_full = summary.is_full();
        Self {
            ticket_id: summary.ticket.id,
            purchaser_name: summary.ticket.purchaser_name,
            purchaser_email: summary.ticket.purchaser_email,
            purchased_count: summary.ticket.purchased_count,
            checked_in: summary.checked_in,
            remaining: summary.remaining,
            is_full,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Totals {
    pub tickets: u64,
    pub tickets_completed: u64,
    pub purchased: u64,
    pub checked_in: u64,
    pub remaining: u64,
}

impl From<db::ticket::Totals> for Totals {
    fn from(totals: db::ticket::Totals) -> Self {
        Self {
            tickets: totals.tickets,
            tickets_completed: totals.tickets_completed,
            purchased: totals.purchased,
            checked_in: totals.checked_in,
            remaining: totals.remaining(),
        }
    }
}
