//! In-memory [`Store`](super::Store) with the same locking contract as the
//! PostgreSQL one: a per-ticket row lock held by the transaction until it
//! commits or is dropped, and changes that become visible only on commit.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use itertools::Itertools as _;
use time::OffsetDateTime;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::{batch, ticket, Batch, Error, Ticket};

#[derive(Clone, Default)]
pub struct Store(Arc<Inner>);

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<ticket::Id, Arc<RowLock<()>>>>,
    last_batch_id: AtomicI64,
}

#[derive(Default)]
struct State {
    tickets: BTreeMap<ticket::Id, Ticket>,
    batches: Vec<Batch>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: &ticket::Id) -> Arc<RowLock<()>> {
        self.0
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl super::Store for Store {
    async fn get_ticket_by_id(
        &self,
        id: &ticket::Id,
    ) -> Result<Option<Ticket>, Error> {
        Ok(self.state().tickets.get(id).cloned())
    }

    async fn search_tickets(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Ticket>, Error> {
        let needle = text.trim().to_lowercase();
        Ok(self
            .state()
            .tickets
            .values()
            .filter(|t| {
                t.purchaser_name.to_lowercase().contains(&needle)
                    || t.purchaser_email.to_lowercase().contains(&needle)
            })
            .sorted_by_cached_key(|t| {
                (t.purchaser_name.to_lowercase(), t.id.clone())
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn write_ticket(&self, ticket: &Ticket) -> Result<(), Error> {
        self.state()
            .tickets
            .insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn get_batches(
        &self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error> {
        Ok(self
            .state()
            .batches
            .iter()
            .filter(|b| &b.ticket == ticket)
            .sorted_by_key(|b| b.id)
            .cloned()
            .collect())
    }

    async fn get_totals(&self) -> Result<ticket::Totals, Error> {
        let state = self.state();

        let mut checked_in = HashMap::<&ticket::Id, u64>::new();
        for batch in &state.batches {
            *checked_in.entry(&batch.ticket).or_default() +=
                u64::from(batch.contribution());
        }

        let mut totals = ticket::Totals::default();
        for ticket in state.tickets.values() {
            let checked = checked_in.get(&ticket.id).copied().unwrap_or(0);
            let purchased = u64::from(ticket.purchased_count);
            totals.tickets += 1;
            totals.purchased += purchased;
            totals.checked_in += checked;
            if checked >= purchased {
                totals.tickets_completed += 1;
            }
        }
        Ok(totals)
    }

    async fn begin(&self) -> Result<Box<dyn super::Transaction>, Error> {
        Ok(Box::new(Transaction {
            store: self.clone(),
            locked: HashMap::new(),
            changes: Vec::new(),
        }))
    }
}

pub struct Transaction {
    store: Store,
    locked: HashMap<ticket::Id, OwnedMutexGuard<()>>,
    changes: Vec<Change>,
}

enum Change {
    Insert(Batch),
    Revoke {
        id: batch::Id,
        at: OffsetDateTime,
        by: Option<String>,
    },
    Reduce {
        id: batch::Id,
        count: u32,
    },
    Touch {
        ticket: ticket::Id,
        at: OffsetDateTime,
    },
}

impl Change {
    fn apply_to_batches(&self, batches: &mut Vec<Batch>) {
        match self {
            Self::Insert(batch) => batches.push(batch.clone()),
            Self::Revoke { id, at, by } => {
                if let Some(batch) = active_mut(batches, *id) {
                    batch.status = batch::Status::Revoked {
                        at: *at,
                        by: by.clone(),
                    };
                }
            }
            Self::Reduce { id, count } => {
                if let Some(batch) = active_mut(batches, *id) {
                    batch.count = *count;
                }
            }
            Self::Touch { .. } => {}
        }
    }

    fn apply_to_ticket(&self, ticket: &mut Ticket) {
        if let Self::Touch { ticket: id, at } = self {
            if *id == ticket.id {
                ticket.last_updated_at = *at;
            }
        }
    }
}

fn active_mut(batches: &mut [Batch], id: batch::Id) -> Option<&mut Batch> {
    batches.iter_mut().find(|b| b.id == id && b.is_active())
}

#[async_trait]
impl super::Transaction for Transaction {
    async fn lock_ticket(
        &mut self,
        id: &ticket::Id,
    ) -> Result<Option<Ticket>, Error> {
        if !self.store.state().tickets.contains_key(id) {
            return Ok(None);
        }
        if !self.locked.contains_key(id) {
            let guard = self.store.row_lock(id).lock_owned().await;
            self.locked.insert(id.clone(), guard);
        }

        let mut ticket = self.store.state().tickets.get(id).cloned();
        if let Some(ticket) = &mut ticket {
            for change in &self.changes {
                change.apply_to_ticket(ticket);
            }
        }
        Ok(ticket)
    }

    async fn get_active_batches(
        &mut self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error> {
        let mut batches = self
            .store
            .state()
            .batches
            .iter()
            .filter(|b| &b.ticket == ticket)
            .cloned()
            .collect::<Vec<_>>();
        for change in &self.changes {
            change.apply_to_batches(&mut batches);
        }
        batches.retain(|b| &b.ticket == ticket && b.is_active());
        batches.sort_by_key(|b| Reverse(b.id));
        Ok(batches)
    }

    async fn insert_batch(
        &mut self,
        batch: batch::New,
    ) -> Result<Batch, Error> {
        let id = self.store.0.last_batch_id.fetch_add(1, Ordering::Relaxed) + 1;
        let batch =
            batch.into_batch(batch::Id::from(id), OffsetDateTime::now_utc());
        self.changes.push(Change::Insert(batch.clone()));
        Ok(batch)
    }

    async fn revoke_batch(
        &mut self,
        id: batch::Id,
        at: OffsetDateTime,
        by: Option<String>,
    ) -> Result<(), Error> {
        self.changes.push(Change::Revoke { id, at, by });
        Ok(())
    }

    async fn reduce_batch(
        &mut self,
        id: batch::Id,
        count: u32,
    ) -> Result<(), Error> {
        self.changes.push(Change::Reduce { id, count });
        Ok(())
    }

    async fn touch_ticket(
        &mut self,
        id: &ticket::Id,
        at: OffsetDateTime,
    ) -> Result<(), Error> {
        self.changes.push(Change::Touch {
            ticket: id.clone(),
            at,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), Error> {
        let changes = std::mem::take(&mut self.changes);
        let mut state = self.store.state();
        let State { tickets, batches } = &mut *state;
        for change in &changes {
            change.apply_to_batches(batches);
            if let Change::Touch { ticket, .. } = change {
                if let Some(ticket) = tickets.get_mut(ticket) {
                    change.apply_to_ticket(ticket);
                }
            }
        }
        Ok(())
    }
}
