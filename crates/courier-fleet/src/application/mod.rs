//! Fleet application services.

pub mod command_handlers;
pub mod store;
pub mod subscribers;
