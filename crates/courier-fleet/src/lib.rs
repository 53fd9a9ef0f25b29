//! Courier Fleet: Sample bounded context.
//!
//! Vehicles, workshops and users whose command handlers write business
//! state and outbox rows in one transaction through the unit of work.

pub mod application;
pub mod domain;
