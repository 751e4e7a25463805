pub mod availability;
pub mod calendar;
pub mod clock;
pub mod command;
pub mod config;
pub mod dedup;
pub mod error;
pub mod inbound;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod reaper;
pub mod store;
pub mod sync;
pub mod wal;
