//! Wire types of the verifier HTTP API.

pub mod checkin;
pub mod ticket;

use serde::{Deserialize, Serialize};

pub use self::ticket::Summary;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Health {
    pub ok: bool,
}
