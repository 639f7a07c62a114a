//! The narrow datastore port handed to handlers (§9: "handlers receive a
//! similar narrowed port; no handler should reach through to arbitrary
//! datastore capabilities"). In practice domain handlers still need real
//! SQL access to their own tables (leads, tasks, inspections, quotes) — the
//! substrate does not coordinate those writes — but they reach it through
//! this single named type rather than an ambient global pool, so every
//! domain dependency is visible in a handler's constructor signature.

use sqlx::PgPool;

#[derive(Clone)]
pub struct DomainDb {
    pool: PgPool,
}

impl DomainDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
