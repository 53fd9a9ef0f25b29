//! Outbox storage backends.
//!
//! `PgOutboxStore` relies on PostgreSQL's `FOR UPDATE SKIP LOCKED` to let
//! any number of pollers claim disjoint batches. `LeaseOutboxStore` keeps
//! everything in memory and emulates the same claim semantics with a
//! `claimed_by` marker and a lease expiry.

pub mod lease_outbox_store;
pub mod pg_outbox_store;
pub mod schema;

pub use lease_outbox_store::{LeaseOutboxStore, LeaseTransaction};
pub use pg_outbox_store::{PgOutboxStore, PgOutboxTransaction};
