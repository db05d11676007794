pub mod config;
pub mod domain;
pub mod error;
pub mod input;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod pubchem;
pub mod rate_gate;
pub mod retry_session;
pub mod transport;
