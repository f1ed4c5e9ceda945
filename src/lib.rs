pub mod api;
pub mod config;
pub mod db;
pub mod http;
pub mod ledger;

pub use self::{config::Config, ledger::Ledger};
