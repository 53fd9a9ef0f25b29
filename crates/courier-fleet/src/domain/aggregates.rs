//! Aggregate roots for the Fleet context.
//!
//! Each aggregate carries its current state plus the events raised since it
//! was loaded. Storage reads and writes the state; the unit of work drains
//! the events.

use courier_core::aggregate::{AggregateRoot, EventBuffer};
use courier_core::clock::Clock;
use courier_core::error::DomainError;
use uuid::Uuid;

use super::events::{
    FleetEvent, FleetEventKind, UserRegistered, VehicleRegistered, VehicleRemoved, VehicleUpdated,
    WorkshopOpened,
};

fn require_non_empty(value: &str, what: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_owned())
}

/// Returns the next sequence number for a new event.
#[allow(clippy::cast_possible_wrap)]
fn next_sequence_number(version: i64, buffer: &EventBuffer<FleetEvent>) -> i64 {
    version + buffer.len() as i64 + 1
}

/// The aggregate root for a vehicle.
#[derive(Debug)]
pub struct Vehicle {
    /// Aggregate identifier.
    pub id: Uuid,
    plate: String,
    model: String,
    workshop_id: Option<Uuid>,
    /// Persisted version; 0 until first saved.
    pub(crate) version: i64,
    events: EventBuffer<FleetEvent>,
}

impl Vehicle {
    /// Registers a new vehicle, producing a `VehicleRegistered` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the plate or model is blank.
    pub fn register(
        id: Uuid,
        plate: &str,
        model: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let plate = require_non_empty(plate, "plate")?.to_uppercase();
        let model = require_non_empty(model, "model")?;
        let mut vehicle = Self {
            id,
            plate: plate.clone(),
            model: model.clone(),
            workshop_id: None,
            version: 0,
            events: EventBuffer::new(),
        };
        let event = FleetEvent::new(
            id,
            next_sequence_number(0, &vehicle.events),
            correlation_id,
            clock,
            FleetEventKind::VehicleRegistered(VehicleRegistered {
                vehicle_id: id,
                plate,
                model,
            }),
        );
        vehicle.raise(event);
        Ok(vehicle)
    }

    /// Rebuilds a vehicle from stored state with an empty event buffer.
    #[must_use]
    pub fn restore(
        id: Uuid,
        plate: String,
        model: String,
        workshop_id: Option<Uuid>,
        version: i64,
    ) -> Self {
        Self {
            id,
            plate,
            model,
            workshop_id,
            version,
            events: EventBuffer::new(),
        }
    }

    #[must_use]
    pub fn plate(&self) -> &str {
        &self.plate
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn workshop_id(&self) -> Option<Uuid> {
        self.workshop_id
    }

    /// Changes model and workshop assignment, producing a `VehicleUpdated`
    /// event. Returns `false` and raises nothing when neither changed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the model is blank.
    pub fn update(
        &mut self,
        model: &str,
        workshop_id: Option<Uuid>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<bool, DomainError> {
        let model = require_non_empty(model, "model")?;
        if model == self.model && workshop_id == self.workshop_id {
            return Ok(false);
        }
        self.model.clone_from(&model);
        self.workshop_id = workshop_id;
        let event = FleetEvent::new(
            self.id,
            next_sequence_number(self.version, &self.events),
            correlation_id,
            clock,
            FleetEventKind::VehicleUpdated(VehicleUpdated {
                vehicle_id: self.id,
                model,
                workshop_id,
            }),
        );
        self.raise(event);
        Ok(true)
    }

    /// Takes the vehicle out of the fleet, producing a `VehicleRemoved`
    /// event.
    pub fn remove(&mut self, correlation_id: Uuid, clock: &dyn Clock) {
        let event = FleetEvent::new(
            self.id,
            next_sequence_number(self.version, &self.events),
            correlation_id,
            clock,
            FleetEventKind::VehicleRemoved(VehicleRemoved {
                vehicle_id: self.id,
                plate: self.plate.clone(),
            }),
        );
        self.raise(event);
    }
}

impl AggregateRoot for Vehicle {
    type Event = FleetEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn event_buffer(&self) -> &EventBuffer<FleetEvent> {
        &self.events
    }

    fn event_buffer_mut(&mut self) -> &mut EventBuffer<FleetEvent> {
        &mut self.events
    }
}

/// The aggregate root for a workshop.
#[derive(Debug)]
pub struct Workshop {
    pub id: Uuid,
    name: String,
    city: String,
    pub(crate) version: i64,
    events: EventBuffer<FleetEvent>,
}

impl Workshop {
    /// Opens a workshop, producing a `WorkshopOpened` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the name or city is blank.
    pub fn open(
        id: Uuid,
        name: &str,
        city: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let name = require_non_empty(name, "workshop name")?;
        let city = require_non_empty(city, "city")?;
        let mut workshop = Self {
            id,
            name: name.clone(),
            city: city.clone(),
            version: 0,
            events: EventBuffer::new(),
        };
        let event = FleetEvent::new(
            id,
            1,
            correlation_id,
            clock,
            FleetEventKind::WorkshopOpened(WorkshopOpened {
                workshop_id: id,
                name,
                city,
            }),
        );
        workshop.raise(event);
        Ok(workshop)
    }

    #[must_use]
    pub fn restore(id: Uuid, name: String, city: String, version: i64) -> Self {
        Self {
            id,
            name,
            city,
            version,
            events: EventBuffer::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn city(&self) -> &str {
        &self.city
    }
}

impl AggregateRoot for Workshop {
    type Event = FleetEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn event_buffer(&self) -> &EventBuffer<FleetEvent> {
        &self.events
    }

    fn event_buffer_mut(&mut self) -> &mut EventBuffer<FleetEvent> {
        &mut self.events
    }
}

/// The aggregate root for a user account.
#[derive(Debug)]
pub struct User {
    pub id: Uuid,
    email: String,
    display_name: String,
    pub(crate) version: i64,
    events: EventBuffer<FleetEvent>,
}

impl User {
    /// Registers a user, producing a `UserRegistered` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the email is not an address or
    /// the display name is blank.
    pub fn register(
        id: Uuid,
        email: &str,
        display_name: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let email = require_non_empty(email, "email")?.to_lowercase();
        if !email.contains('@') {
            return Err(DomainError::Validation(format!(
                "email {email:?} is not an address"
            )));
        }
        let display_name = require_non_empty(display_name, "display name")?;
        let mut user = Self {
            id,
            email: email.clone(),
            display_name: display_name.clone(),
            version: 0,
            events: EventBuffer::new(),
        };
        let event = FleetEvent::new(
            id,
            1,
            correlation_id,
            clock,
            FleetEventKind::UserRegistered(UserRegistered {
                user_id: id,
                email,
                display_name,
            }),
        );
        user.raise(event);
        Ok(user)
    }

    #[must_use]
    pub fn restore(id: Uuid, email: String, display_name: String, version: i64) -> Self {
        Self {
            id,
            email,
            display_name,
            version,
            events: EventBuffer::new(),
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl AggregateRoot for User {
    type Event = FleetEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn event_buffer(&self) -> &EventBuffer<FleetEvent> {
        &self.events
    }

    fn event_buffer_mut(&mut self) -> &mut EventBuffer<FleetEvent> {
        &mut self.events
    }
}
