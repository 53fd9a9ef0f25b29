//! Commands for the Fleet context.

use uuid::Uuid;

/// Command to register a new vehicle.
#[derive(Debug, Clone)]
pub struct RegisterVehicle {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The vehicle identifier.
    pub vehicle_id: Uuid,
    /// Licence plate; unique across the fleet.
    pub plate: String,
    /// Make and model.
    pub model: String,
}

/// Command to change a vehicle's model or assigned workshop.
#[derive(Debug, Clone)]
pub struct UpdateVehicle {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The vehicle identifier.
    pub vehicle_id: Uuid,
    /// New make and model.
    pub model: String,
    /// Workshop the vehicle is assigned to, if any.
    pub workshop_id: Option<Uuid>,
}

/// Command to take a vehicle out of the fleet.
#[derive(Debug, Clone)]
pub struct RemoveVehicle {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The vehicle identifier.
    pub vehicle_id: Uuid,
}

/// Command to open a workshop.
#[derive(Debug, Clone)]
pub struct OpenWorkshop {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The workshop identifier.
    pub workshop_id: Uuid,
    /// Display name.
    pub name: String,
    /// City the workshop is located in.
    pub city: String,
}

/// Command to register a user.
#[derive(Debug, Clone)]
pub struct RegisterUser {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The user identifier.
    pub user_id: Uuid,
    /// Login email; unique across users.
    pub email: String,
    /// Name shown in the UI.
    pub display_name: String,
}
