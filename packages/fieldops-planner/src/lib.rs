//! Compiles structured requests into contract-valid tool calls, enqueues
//! them, optionally waits for their receipts, and returns a structured
//! response. The one component in the substrate that talks to callers in
//! terms of intent rather than a fixed `tool_name`/`input` pair.

pub mod planner;
pub mod rules;

pub use planner::{Planner, RunLimits, RunRequest, RunResponse};
pub use rules::{PlannerRequest, PlannerRule, RuleSet};
