use std::{env, sync::Arc};

use attendance_ledger::{
    api, config,
    db::{self, Store as _},
    http::{self, AppState},
    Ledger,
};
use constcat::concat;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio_postgres::NoTls;

pub const API_KEY: &str = "verifier-secret";
pub const BEARER_API_KEY: &str = concat!("Bearer ", API_KEY);

pub fn ticket(id: &str, name: &str, purchased_count: u32) -> db::Ticket {
    db::Ticket {
        id: id.into(),
        purchaser_name: name.to_owned(),
        purchaser_email: format!("{}@example.com", name.to_lowercase()),
        purchased_count,
        last_updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub async fn ledger_with(tickets: &[db::Ticket]) -> Ledger {
    Ledger::new(memory_store(tickets).await)
}

pub async fn memory_store(tickets: &[db::Ticket]) -> Arc<dyn db::Store> {
    let store = db::memory::Store::new();
    write_tickets(&store, tickets).await;
    Arc::new(store)
}

/// PostgreSQL store in a fresh schema named `schema`, loaded from
/// `schema.sql`. Connects to `DATABASE_URL`.
pub async fn pg_store(
    schema: &str,
    pool_size: usize,
    tickets: &[db::Ticket],
) -> Arc<dyn db::Store> {
    let url = env::var("DATABASE_URL").expect("DATABASE_URL is not set");

    let (client, connection) = tokio_postgres::connect(&url, NoTls)
        .await
        .expect("failed to connect to the database");
    tokio::spawn(connection);
    client
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {schema} CASCADE; \
             CREATE SCHEMA {schema}; \
             SET search_path TO {schema};"
        ))
        .await
        .expect("failed to create a schema");
    client
        .batch_execute(include_str!("../../schema.sql"))
        .await
        .expect("failed to load the schema");

    let separator = if url.contains('?') { '&' } else { '?' };
    let store = db::connect(config::Db {
        url: format!("{url}{separator}options=-csearch_path%3D{schema}"),
        connect_timeout: None,
        pool_size,
    })
    .await
    .expect("failed to connect to the database");
    write_tickets(&store, tickets).await;
    Arc::new(store)
}

pub async fn pg_ledger(schema: &str, tickets: &[db::Ticket]) -> Ledger {
    Ledger::new(pg_store(schema, 4, tickets).await)
}

async fn write_tickets(store: &dyn db::Store, tickets: &[db::Ticket]) {
    for ticket in tickets {
        store
            .write_ticket(ticket)
            .await
            .expect("failed to write a ticket");
    }
}

/// How a [`Client`] authenticates its requests.
#[derive(Clone, Copy)]
pub enum Auth {
    None,
    ApiKey(&'static str),
    Header(&'static str, &'static str),
}

pub struct Client {
    inner: reqwest::Client,
    base_url: String,
    pub auth: Auth,
}

impl Client {
    /// Serves `ledger` on an ephemeral port, requiring `api_key` if given.
    pub async fn spawn(ledger: Ledger, api_key: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind a listener");
        let addr = listener.local_addr().expect("failed to get an address");
        let app = http::router(Arc::new(AppState {
            ledger,
            api_key: api_key.map(str::to_owned),
        }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        Self {
            inner: reqwest::Client::new(),
            base_url: format!("http://{addr}"),
            auth: api_key.map_or(Auth::None, Auth::ApiKey),
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.inner.get(format!("{}{path}", self.base_url)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.inner.post(format!("{}{path}", self.base_url)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.auth {
            Auth::None => req,
            Auth::ApiKey(key) => req.header("X-API-Key", key),
            Auth::Header(name, value) => req.header(name, value),
        }
    }

    async fn send<T: DeserializeOwned>(
        req: RequestBuilder,
    ) -> Result<T, (StatusCode, String)> {
        let res = req.send().await.expect("failed to send a request");
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.expect("failed to get a response");
            return Err((status, body));
        }
        Ok(res.json::<T>().await.expect("failed to get a response"))
    }

    pub async fn health(&self) -> Result<api::Health, StatusCode> {
        Self::send(self.get("/health")).await.map_err(|(s, _)| s)
    }

    pub async fn summary(
        &self,
        ticket_id: &str,
    ) -> Result<api::Summary, StatusCode> {
        Self::send(self.get("/summary").query(&[("ticket_id", ticket_id)]))
            .await
            .map_err(|(s, _)| s)
    }

    pub async fn checkin(
        &self,
        ticket_id: &str,
        delta: i64,
    ) -> Result<api::checkin::Response, (StatusCode, String)> {
        Self::send(self.post("/checkin").json(&json!({
            "ticket_id": ticket_id,
            "delta": delta,
            "verifier_id": "gate-1",
        })))
        .await
    }

    pub async fn search(
        &self,
        q: &str,
    ) -> Result<Vec<api::Summary>, StatusCode> {
        Self::send(self.get("/search").query(&[("q", q)]))
            .await
            .map_err(|(s, _)| s)
    }

    pub async fn history(
        &self,
        ticket_id: &str,
    ) -> Result<Vec<api::checkin::Batch>, StatusCode> {
        Self::send(self.get("/history").query(&[("ticket_id", ticket_id)]))
            .await
            .map_err(|(s, _)| s)
    }

    pub async fn totals(&self) -> Result<api::ticket::Totals, StatusCode> {
        Self::send(self.get("/totals")).await.map_err(|(s, _)| s)
    }
}
