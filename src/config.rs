use std::{net, time};

use serde::Deserialize;

#[derive(Deserialize)]
pub struct Config {
    pub db: Db,
    pub http: Http,
    #[serde(default)]
    pub auth: Auth,
}

#[derive(Deserialize)]
pub struct Db {
    /// PostgreSQL connection string, or `memory` for the in-memory store.
    pub url: String,
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<time::Duration>,
    /// Upper bound on open connections. Check-ins beyond it wait for a free
    /// connection.
    #[serde(default = "Db::default_pool_size")]
    pub pool_size: usize,
}

impl Db {
    pub const MEMORY: &'static str = "memory";

    fn default_pool_size() -> usize {
        16
    }

    pub fn is_memory(&self) -> bool {
        self.url == Self::MEMORY
    }
}

#[derive(Deserialize)]
pub struct Http {
    pub server: Server,
    pub cors: Cors,
}

#[derive(Deserialize)]
pub struct Server {
    pub addr: net::SocketAddr,
}

#[derive(Deserialize)]
pub struct Cors {
    pub allowed_origins: Vec<String>,
}

#[derive(Default, Deserialize)]
pub struct Auth {
    /// Shared secret expected in `X-API-Key` or `Authorization: Bearer`.
    /// Auth is disabled when unset.
    pub api_key: Option<String>,
}
