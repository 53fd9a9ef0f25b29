//! Command handlers for the Fleet context.
//!
//! Every handler follows the same shape: open a unit of work, load and
//! validate inside its transaction, mutate the aggregate, write its state,
//! track it, and commit. The commit stages outbox rows for the aggregate's
//! dispatchable events alongside the state change.

use courier_core::clock::Clock;
use courier_core::error::DomainError;
use courier_core::outbox::TransactionalStore;
use courier_core::unit_of_work::{CommitReceipt, EventDispatcher, UnitOfWork};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::store::FleetWrites;
use crate::domain::aggregates::{User, Vehicle, Workshop};
use crate::domain::commands::{
    OpenWorkshop, RegisterUser, RegisterVehicle, RemoveVehicle, UpdateVehicle,
};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct FleetCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// What the commit wrote and dispatched.
    pub receipt: CommitReceipt,
}

/// Handles the `RegisterVehicle` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the plate is already registered or
/// the input is blank, and `DomainError` for storage failures.
#[instrument(skip_all, fields(vehicle_id = %command.vehicle_id))]
pub async fn handle_register_vehicle<S>(
    command: &RegisterVehicle,
    store: &S,
    dispatcher: &EventDispatcher,
    clock: &dyn Clock,
) -> Result<FleetCommandResult, DomainError>
where
    S: TransactionalStore,
    S::Transaction: FleetWrites,
{
    let mut uow = UnitOfWork::begin(store, clock).await?;
    if uow.transaction().plate_in_use(&command.plate).await? {
        return Err(DomainError::Validation(format!(
            "plate {} is already registered",
            command.plate.trim().to_uppercase()
        )));
    }

    let mut vehicle = Vehicle::register(
        command.vehicle_id,
        &command.plate,
        &command.model,
        command.correlation_id,
        clock,
    )?;
    uow.transaction().save_vehicle(&vehicle).await?;
    uow.track(&mut vehicle);

    let receipt = uow.commit(dispatcher).await?;
    info!(outbox_rows = receipt.outbox_row_ids.len(), "vehicle registered");
    Ok(FleetCommandResult {
        aggregate_id: command.vehicle_id,
        receipt,
    })
}

/// Handles the `UpdateVehicle` command. A command that changes nothing
/// commits no outbox row.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the vehicle or the target
/// workshop does not exist, `DomainError::ConcurrencyConflict` if the
/// vehicle changed concurrently, and `DomainError` for storage failures.
#[instrument(skip_all, fields(vehicle_id = %command.vehicle_id))]
pub async fn handle_update_vehicle<S>(
    command: &UpdateVehicle,
    store: &S,
    dispatcher: &EventDispatcher,
    clock: &dyn Clock,
) -> Result<FleetCommandResult, DomainError>
where
    S: TransactionalStore,
    S::Transaction: FleetWrites,
{
    let mut uow = UnitOfWork::begin(store, clock).await?;
    let mut vehicle = uow
        .transaction()
        .find_vehicle(command.vehicle_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(command.vehicle_id))?;
    if let Some(workshop_id) = command.workshop_id {
        if uow.transaction().find_workshop(workshop_id).await?.is_none() {
            return Err(DomainError::AggregateNotFound(workshop_id));
        }
    }

    if vehicle.update(
        &command.model,
        command.workshop_id,
        command.correlation_id,
        clock,
    )? {
        uow.transaction().save_vehicle(&vehicle).await?;
    }
    uow.track(&mut vehicle);

    let receipt = uow.commit(dispatcher).await?;
    Ok(FleetCommandResult {
        aggregate_id: command.vehicle_id,
        receipt,
    })
}

/// Handles the `RemoveVehicle` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the vehicle does not exist,
/// and `DomainError` for storage failures.
#[instrument(skip_all, fields(vehicle_id = %command.vehicle_id))]
pub async fn handle_remove_vehicle<S>(
    command: &RemoveVehicle,
    store: &S,
    dispatcher: &EventDispatcher,
    clock: &dyn Clock,
) -> Result<FleetCommandResult, DomainError>
where
    S: TransactionalStore,
    S::Transaction: FleetWrites,
{
    let mut uow = UnitOfWork::begin(store, clock).await?;
    let mut vehicle = uow
        .transaction()
        .find_vehicle(command.vehicle_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(command.vehicle_id))?;

    vehicle.remove(command.correlation_id, clock);
    uow.transaction().delete_vehicle(&vehicle).await?;
    uow.track(&mut vehicle);

    let receipt = uow.commit(dispatcher).await?;
    info!("vehicle removed");
    Ok(FleetCommandResult {
        aggregate_id: command.vehicle_id,
        receipt,
    })
}

/// Handles the `OpenWorkshop` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for blank input and `DomainError` for
/// storage failures.
#[instrument(skip_all, fields(workshop_id = %command.workshop_id))]
pub async fn handle_open_workshop<S>(
    command: &OpenWorkshop,
    store: &S,
    dispatcher: &EventDispatcher,
    clock: &dyn Clock,
) -> Result<FleetCommandResult, DomainError>
where
    S: TransactionalStore,
    S::Transaction: FleetWrites,
{
    let mut uow = UnitOfWork::begin(store, clock).await?;
    let mut workshop = Workshop::open(
        command.workshop_id,
        &command.name,
        &command.city,
        command.correlation_id,
        clock,
    )?;
    uow.transaction().save_workshop(&workshop).await?;
    uow.track(&mut workshop);

    let receipt = uow.commit(dispatcher).await?;
    Ok(FleetCommandResult {
        aggregate_id: command.workshop_id,
        receipt,
    })
}

/// Handles the `RegisterUser` command. The resulting event stays in
/// process; default preferences are created by a subscriber after commit.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the email is taken or invalid, and
/// `DomainError` for storage failures.
#[instrument(skip_all, fields(user_id = %command.user_id))]
pub async fn handle_register_user<S>(
    command: &RegisterUser,
    store: &S,
    dispatcher: &EventDispatcher,
    clock: &dyn Clock,
) -> Result<FleetCommandResult, DomainError>
where
    S: TransactionalStore,
    S::Transaction: FleetWrites,
{
    let mut uow = UnitOfWork::begin(store, clock).await?;
    if uow.transaction().email_in_use(&command.email).await? {
        return Err(DomainError::Validation(format!(
            "email {} is already registered",
            command.email.trim().to_lowercase()
        )));
    }

    let mut user = User::register(
        command.user_id,
        &command.email,
        &command.display_name,
        command.correlation_id,
        clock,
    )?;
    uow.transaction().save_user(&user).await?;
    uow.track(&mut user);

    let receipt = uow.commit(dispatcher).await?;
    Ok(FleetCommandResult {
        aggregate_id: command.user_id,
        receipt,
    })
}
