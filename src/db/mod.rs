pub mod batch;
pub mod memory;
pub mod ticket;

use std::error::Error as StdError;

use async_trait::async_trait;
use deadpool_postgres::{
    BuildError, Manager, ManagerConfig, Object, Pool, PoolError,
    RecyclingMethod, Runtime,
};
use derive_more::{Display, From};
use futures::FutureExt as _;
use time::OffsetDateTime;
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    NoTls,
};

use crate::config;

pub use self::{batch::Batch, ticket::Ticket};

#[derive(Debug, Display, From)]
pub enum Error {
    #[display("{_0}")]
    Postgres(tokio_postgres::Error),

    #[display("connection pool: {_0}")]
    Pool(PoolError),

    #[display("connection pool setup: {_0}")]
    PoolBuild(BuildError),
}

impl StdError for Error {}

/// Builds the connection pool and checks that the database is reachable.
pub async fn connect(config: config::Db) -> Result<Client, Error> {
    let mut pg_config = config.url.parse::<tokio_postgres::Config>()?;
    if let Some(timeout) = config.connect_timeout {
        pg_config.connect_timeout(timeout);
    }
    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager)
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .create_timeout(config.connect_timeout)
        .build()?;

    drop(pool.get().await?);
    Ok(Client { pool })
}

/// Read/write access to tickets and their check-in batches.
///
/// Reads never lock. Every mutation of the ledger goes through a
/// [`Transaction`] obtained from [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_ticket_by_id(
        &self,
        id: &ticket::Id,
    ) -> Result<Option<Ticket>, Error>;

    /// Case-insensitive substring match on purchaser name or email, ordered
    /// by name.
    async fn search_tickets(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Ticket>, Error>;

    /// Inserts or replaces the ticket row. Existing batches are kept.
    async fn write_ticket(&self, ticket: &Ticket) -> Result<(), Error>;

    /// All batches of the ticket, oldest first.
    async fn get_batches(
        &self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error>;

    async fn get_totals(&self) -> Result<ticket::Totals, Error>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, Error>;
}

/// A single ledger transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls back
/// everything done through it and releases its locks.
#[async_trait]
pub trait Transaction: Send {
    /// Loads the ticket and holds its row lock until the transaction ends.
    async fn lock_ticket(
        &mut self,
        id: &ticket::Id,
    ) -> Result<Option<Ticket>, Error>;

    /// Active batches of the ticket, most recent first.
    async fn get_active_batches(
        &mut self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error>;

    async fn insert_batch(&mut self, batch: batch::New)
        -> Result<Batch, Error>;

    async fn revoke_batch(
        &mut self,
        id: batch::Id,
        at: OffsetDateTime,
        by: Option<String>,
    ) -> Result<(), Error>;

    async fn reduce_batch(
        &mut self,
        id: batch::Id,
        count: u32,
    ) -> Result<(), Error>;

    async fn touch_ticket(
        &mut self,
        id: &ticket::Id,
        at: OffsetDateTime,
    ) -> Result<(), Error>;

    /// Makes the changes visible. Locks are released once the transaction
    /// is dropped.
    async fn commit(&mut self) -> Result<(), Error>;
}

/// PostgreSQL store.
///
/// Reads and transactions draw connections from a bounded pool, so callers
/// queued on a ticket's row lock never hold more than `pool_size` server
/// backends between them.
#[derive(Clone)]
pub struct Client {
    pool: Pool,
}

impl Client {
    pub async fn begin_session(&self) -> Result<Session, Error> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Session {
            client,
            open: true,
        })
    }
}

#[async_trait]
impl Store for Client {
    async fn get_ticket_by_id(
        &self,
        id: &ticket::Id,
    ) -> Result<Option<Ticket>, Error> {
        Client::get_ticket_by_id(self, id).await
    }

    async fn search_tickets(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Ticket>, Error> {
        Client::search_tickets(self, text, limit).await
    }

    async fn write_ticket(&self, ticket: &Ticket) -> Result<(), Error> {
        Client::write_ticket(self, ticket).await
    }

    async fn get_batches(
        &self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error> {
        Client::get_batches(self, ticket).await
    }

    async fn get_totals(&self) -> Result<ticket::Totals, Error> {
        Client::get_totals(self).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        Ok(Box::new(self.begin_session().await?))
    }
}

/// Open PostgreSQL transaction on a pooled connection.
pub struct Session {
    client: Object,
    open: bool,
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.open {
            // The first poll queues `ROLLBACK` on the connection, ahead of
            // anything the next holder of this pooled connection sends.
            let _ = self.client.batch_execute("ROLLBACK").now_or_never();
        }
    }
}

#[async_trait]
impl Transaction for Session {
    async fn lock_ticket(
        &mut self,
        id: &ticket::Id,
    ) -> Result<Option<Ticket>, Error> {
        Session::lock_ticket(self, id).await
    }

    async fn get_active_batches(
        &mut self,
        ticket: &ticket::Id,
    ) -> Result<Vec<Batch>, Error> {
        Session::get_active_batches(self, ticket).await
    }

    async fn insert_batch(
        &mut self,
        batch: batch::New,
    ) -> Result<Batch, Error> {
        Session::insert_batch(self, batch).await
    }

    async fn revoke_batch(
        &mut self,
        id: batch::Id,
        at: OffsetDateTime,
        by: Option<String>,
    ) -> Result<(), Error> {
        Session::revoke_batch(self, id, at, by).await
    }

    async fn reduce_batch(
        &mut self,
        id: batch::Id,
        count: u32,
    ) -> Result<(), Error> {
        Session::reduce_batch(self, id, count).await
    }

    async fn touch_ticket(
        &mut self,
        id: &ticket::Id,
        at: OffsetDateTime,
    ) -> Result<(), Error> {
        Session::touch_ticket(self, id, at).await
    }

    async fn commit(&mut self) -> Result<(), Error> {
        self.client.batch_execute("COMMIT").await?;
        self.open = false;
        Ok(())
    }
}

/// Non-negative count stored as `INTEGER`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Count(pub u32);

impl FromSql<'_> for Count {
    accepts!(INT4);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i32::from_sql(ty, raw)?;
        let count = u32::try_from(repr).map_err(|_| "negative count")?;
        Ok(Self(count))
    }
}

impl ToSql for Count {
    accepts!(INT4);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let repr = i32::try_from(self.0)?;
        repr.to_sql(ty, out)
    }
}
