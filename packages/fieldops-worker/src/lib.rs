//! The executor worker: claims calls, enforces contracts, invokes domain
//! handlers under a deadline, and writes exactly one receipt per call.

pub mod config;
pub mod db;
pub mod handler;
pub mod sweeper;
mod worker;

pub use config::WorkerConfig;
pub use db::DomainDb;
pub use handler::{Handler, HandlerContext, HandlerRegistry};
pub use sweeper::Sweeper;
pub use worker::{insert_effect, Worker};
