//! Shared data model for the tool-execution substrate: contracts, calls,
//! receipts, runs, and the error taxonomy every other crate builds on.

pub mod call;
pub mod canonical;
pub mod contract;
pub mod error;
pub mod outcome;
pub mod receipt;
pub mod run;

pub use call::{Call, CallStatus};
pub use contract::{Contract, Idempotency, IdempotencyMode, Permission, Schema, SchemaType};
pub use error::{error_codes, SubstrateError};
pub use outcome::Outcome;
pub use receipt::{DbAction, DbWrite, Effects, IdempotencyEffect, Receipt, ReceiptStatus};
pub use run::{PlannedCall, Run, RunMode};
