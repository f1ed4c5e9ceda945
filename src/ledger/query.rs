use derive_more::{Display, From};
use futures::future;

use crate::db::{self, ticket, Batch, Ticket};

use super::{rollup, Ledger, Progress};

/// Maximum number of tickets returned by [`Ledger::search`].
pub const SEARCH_LIMIT: usize = 25;

/// A ticket together with its freshly computed rollup.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub ticket: Ticket,
    pub checked_in: u32,
    pub remaining: u32,
    pub progress: Progress,
}

impl Summary {
    fn new(ticket: Ticket, batches: &[Batch]) -> Self {
        let checked_in = rollup::checked_in(batches);
        let purchased = ticket.purchased_count;
        Self {
            ticket,
            checked_in,
            remaining: rollup::remaining(purchased, checked_in),
            progress: Progress::of(purchased, checked_in),
        }
    }

    pub fn is_full(&self) -> bool {
        self.progress == Progress::Full
    }
}

#[derive(Debug, Display, From)]
pub enum GetTicketError {
    #[display("database error: {_0}")]
    #[from]
    DbError(db::Error),

    #[display("Ticket not found.")]
    TicketNotFound,
}

impl Ledger {
    pub async fn get_ticket(
        &self,
        id: &ticket::Id,
    ) -> Result<Summary, GetTicketError> {
        let ticket = self
            .store
            .get_ticket_by_id(id)
            .await?
            .ok_or(GetTicketError::TicketNotFound)?;
        let batches = self.store.get_batches(id).await?;
        Ok(Summary::new(ticket, &batches))
    }

    /// Tickets whose purchaser name or email contains `text`, ignoring case,
    /// ordered by name. Blank text matches nothing.
    pub async fn search(&self, text: &str) -> Result<Vec<Summary>, db::Error> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tickets = self.store.search_tickets(text, SEARCH_LIMIT).await?;
        let batches = future::try_join_all(
            tickets.iter().map(|t| self.store.get_batches(&t.id)),
        )
        .await?;

        Ok(tickets
            .into_iter()
            .zip(batches)
            .map(|(ticket, batches)| Summary::new(ticket, &batches))
            .collect())
    }

    /// Every batch recorded against the ticket, oldest first, revoked ones
    /// included.
    pub async fn history(
        &self,
        id: &ticket::Id,
    ) -> Result<Vec<Batch>, GetTicketError> {
        if self.store.get_ticket_by_id(id).await?.is_none() {
            return Err(GetTicketError::TicketNotFound);
        }
        Ok(self.store.get_batches(id).await?)
    }

    pub async fn totals(&self) -> Result<ticket::Totals, db::Error> {
        self.store.get_totals().await
    }
}
