//! Domain events for the Fleet context.
//!
//! Vehicle and workshop events leave the process through the outbox under
//! their wire names. `UserRegistered` is only observed by in-process
//! subscribers.

use courier_core::clock::Clock;
use courier_core::event::{DomainEvent, EventMetadata, OutboxEvent, WireEvent, WirePayload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// In-process event type for [`VehicleRegistered`].
pub const VEHICLE_REGISTERED_EVENT_TYPE: &str = "fleet.vehicle_registered";
/// In-process event type for [`VehicleUpdated`].
pub const VEHICLE_UPDATED_EVENT_TYPE: &str = "fleet.vehicle_updated";
/// In-process event type for [`VehicleRemoved`].
pub const VEHICLE_REMOVED_EVENT_TYPE: &str = "fleet.vehicle_removed";
/// In-process event type for [`WorkshopOpened`].
pub const WORKSHOP_OPENED_EVENT_TYPE: &str = "fleet.workshop_opened";
/// In-process event type for [`UserRegistered`].
pub const USER_REGISTERED_EVENT_TYPE: &str = "fleet.user_registered";

/// Wire names other services subscribe to.
pub mod wire {
    pub const VEHICLE_REGISTERED: &str = "VehicleRegistered";
    pub const VEHICLE_UPDATED: &str = "VehicleUpdated";
    pub const VEHICLE_REMOVED: &str = "VehicleRemoved";
    pub const WORKSHOP_OPENED: &str = "WorkshopOpened";
}

/// Emitted when a vehicle joins the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRegistered {
    pub vehicle_id: Uuid,
    pub plate: String,
    pub model: String,
}

/// Emitted when a vehicle's model or workshop changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleUpdated {
    pub vehicle_id: Uuid,
    pub model: String,
    pub workshop_id: Option<Uuid>,
}

/// Emitted when a vehicle leaves the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRemoved {
    pub vehicle_id: Uuid,
    pub plate: String,
}

/// Emitted when a workshop opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkshopOpened {
    pub workshop_id: Uuid,
    pub name: String,
    pub city: String,
}

/// Emitted when a user signs up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
}

/// Event payload variants for the Fleet context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FleetEventKind {
    VehicleRegistered(VehicleRegistered),
    VehicleUpdated(VehicleUpdated),
    VehicleRemoved(VehicleRemoved),
    WorkshopOpened(WorkshopOpened),
    UserRegistered(UserRegistered),
}

impl FleetEventKind {
    fn event_type(&self) -> &'static str {
        match self {
            Self::VehicleRegistered(_) => VEHICLE_REGISTERED_EVENT_TYPE,
            Self::VehicleUpdated(_) => VEHICLE_UPDATED_EVENT_TYPE,
            Self::VehicleRemoved(_) => VEHICLE_REMOVED_EVENT_TYPE,
            Self::WorkshopOpened(_) => WORKSHOP_OPENED_EVENT_TYPE,
            Self::UserRegistered(_) => USER_REGISTERED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the Fleet context.
#[derive(Debug, Clone)]
pub struct FleetEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: FleetEventKind,
}

impl FleetEvent {
    /// Stamps `kind` with fresh metadata.
    pub(crate) fn new(
        aggregate_id: Uuid,
        sequence_number: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
        kind: FleetEventKind,
    ) -> Self {
        Self {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                aggregate_id,
                sequence_number,
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        }
    }
}

impl DomainEvent for FleetEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or(serde_json::Value::Null)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn as_outbox_event(&self) -> Option<&dyn OutboxEvent> {
        match self.kind {
            FleetEventKind::UserRegistered(_) => None,
            _ => Some(self as &dyn OutboxEvent),
        }
    }
}

impl OutboxEvent for FleetEvent {
    fn to_wire_event(&self) -> Result<WireEvent, serde_json::Error> {
        let metadata = &self.metadata;
        match &self.kind {
            FleetEventKind::VehicleRegistered(data) => {
                WirePayload::from_metadata(metadata, data).into_wire_event(wire::VEHICLE_REGISTERED)
            }
            FleetEventKind::VehicleUpdated(data) => {
                WirePayload::from_metadata(metadata, data).into_wire_event(wire::VEHICLE_UPDATED)
            }
            FleetEventKind::VehicleRemoved(data) => {
                WirePayload::from_metadata(metadata, data).into_wire_event(wire::VEHICLE_REMOVED)
            }
            FleetEventKind::WorkshopOpened(data) => {
                WirePayload::from_metadata(metadata, data).into_wire_event(wire::WORKSHOP_OPENED)
            }
            FleetEventKind::UserRegistered(data) => {
                WirePayload::from_metadata(metadata, data).into_wire_event("UserRegistered")
            }
        }
    }
}
