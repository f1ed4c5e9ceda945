//! Attendance check-in ledger.
//!
//! Tracks, per ticket, how many purchased attendee slots are admitted. The
//! admitted count is never stored: it is the rollup of the ticket's active
//! batches, recomputed on every read and inside every update.

pub mod checkin;
pub mod query;
pub mod rollup;

use std::sync::Arc;

use crate::db;

pub use self::{
    checkin::{ApplyDeltaError, Checkin, OutOfBounds},
    query::{GetTicketError, Summary},
    rollup::Progress,
};

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn db::Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn db::Store>) -> Self {
        Self { store }
    }
}
