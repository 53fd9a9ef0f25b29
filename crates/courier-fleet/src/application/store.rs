//! Fleet persistence inside an outbox transaction.
//!
//! [`FleetWrites`] is implemented for both outbox transaction types, so the
//! same command handlers run against PostgreSQL and the in-memory store.
//! Updates are guarded by the aggregate's version. On PostgreSQL the unique
//! plate and email columns close the check-then-insert race; the in-memory
//! store closes it by failing the commit of a transaction whose reads went
//! stale.

use async_trait::async_trait;
use courier_core::error::DomainError;
use courier_core::outbox::OutboxTransaction;
use courier_outbox_store::{LeaseTransaction, PgOutboxTransaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{User, Vehicle, Workshop};

/// Per-user settings created when a user registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub locale: String,
    pub notifications_enabled: bool,
}

impl UserPreferences {
    /// The settings every new user starts with.
    #[must_use]
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            locale: "en-US".to_owned(),
            notifications_enabled: true,
        }
    }
}

/// Fleet reads and writes that share the business transaction.
#[async_trait]
pub trait FleetWrites: OutboxTransaction {
    async fn find_vehicle(&mut self, id: Uuid) -> Result<Option<Vehicle>, DomainError>;

    async fn plate_in_use(&mut self, plate: &str) -> Result<bool, DomainError>;

    /// Inserts a new vehicle (version 0) or updates an existing one whose
    /// stored version still equals `vehicle.version`.
    async fn save_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), DomainError>;

    async fn delete_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), DomainError>;

    async fn find_workshop(&mut self, id: Uuid) -> Result<Option<Workshop>, DomainError>;

    async fn save_workshop(&mut self, workshop: &Workshop) -> Result<(), DomainError>;

    async fn find_user(&mut self, id: Uuid) -> Result<Option<User>, DomainError>;

    async fn email_in_use(&mut self, email: &str) -> Result<bool, DomainError>;

    async fn save_user(&mut self, user: &User) -> Result<(), DomainError>;

    async fn find_preferences(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<UserPreferences>, DomainError>;

    /// Stores `preferences` unless the user already has some. Returns
    /// `true` if a row was written.
    async fn insert_preferences(
        &mut self,
        preferences: &UserPreferences,
    ) -> Result<bool, DomainError>;
}

fn infrastructure_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

fn conflict(aggregate_id: Uuid, expected: i64) -> DomainError {
    DomainError::ConcurrencyConflict {
        aggregate_id,
        expected,
        actual: expected + 1,
    }
}

#[derive(sqlx::FromRow)]
struct VehicleRow {
    id: Uuid,
    plate: String,
    model: String,
    workshop_id: Option<Uuid>,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct WorkshopRow {
    id: Uuid,
    name: String,
    city: String,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    display_name: String,
    version: i64,
}

#[async_trait]
impl FleetWrites for PgOutboxTransaction {
    async fn find_vehicle(&mut self, id: Uuid) -> Result<Option<Vehicle>, DomainError> {
        let row = sqlx::query_as::<_, VehicleRow>(
            "SELECT id, plate, model, workshop_id, version FROM vehicles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.connection())
        .await
        .map_err(infrastructure_error)?;
        Ok(row.map(|r| Vehicle::restore(r.id, r.plate, r.model, r.workshop_id, r.version)))
    }

    async fn plate_in_use(&mut self, plate: &str) -> Result<bool, DomainError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM vehicles WHERE plate = $1)")
            .bind(plate.trim().to_uppercase())
            .fetch_one(self.connection())
            .await
            .map_err(infrastructure_error)
    }

    async fn save_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), DomainError> {
        let result = if vehicle.version == 0 {
            sqlx::query(
                "INSERT INTO vehicles (id, plate, model, workshop_id, version) \
                 VALUES ($1, $2, $3, $4, 1)",
            )
            .bind(vehicle.id)
            .bind(vehicle.plate())
            .bind(vehicle.model())
            .bind(vehicle.workshop_id())
            .execute(self.connection())
            .await
        } else {
            sqlx::query(
                "UPDATE vehicles SET model = $2, workshop_id = $3, version = version + 1 \
                 WHERE id = $1 AND version = $4",
            )
            .bind(vehicle.id)
            .bind(vehicle.model())
            .bind(vehicle.workshop_id())
            .bind(vehicle.version)
            .execute(self.connection())
            .await
        };

        if result.map_err(infrastructure_error)?.rows_affected() == 0 {
            return Err(conflict(vehicle.id, vehicle.version));
        }
        Ok(())
    }

    async fn delete_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), DomainError> {
        let result = sqlx::query("DELETE FROM vehicles WHERE id = $1 AND version = $2")
            .bind(vehicle.id)
            .bind(vehicle.version)
            .execute(self.connection())
            .await
            .map_err(infrastructure_error)?;
        if result.rows_affected() == 0 {
            return Err(conflict(vehicle.id, vehicle.version));
        }
        Ok(())
    }

    async fn find_workshop(&mut self, id: Uuid) -> Result<Option<Workshop>, DomainError> {
        let row = sqlx::query_as::<_, WorkshopRow>(
            "SELECT id, name, city, version FROM workshops WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.connection())
        .await
        .map_err(infrastructure_error)?;
        Ok(row.map(|r| Workshop::restore(r.id, r.name, r.city, r.version)))
    }

    async fn save_workshop(&mut self, workshop: &Workshop) -> Result<(), DomainError> {
        sqlx::query("INSERT INTO workshops (id, name, city, version) VALUES ($1, $2, $3, 1)")
            .bind(workshop.id)
            .bind(workshop.name())
            .bind(workshop.city())
            .execute(self.connection())
            .await
            .map_err(infrastructure_error)?;
        Ok(())
    }

    async fn find_user(&mut self, id: Uuid) -> Result<Option<User>, DomainError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, version FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.connection())
        .await
        .map_err(infrastructure_error)?;
        Ok(row.map(|r| User::restore(r.id, r.email, r.display_name, r.version)))
    }

    async fn email_in_use(&mut self, email: &str) -> Result<bool, DomainError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
            .bind(email.trim().to_lowercase())
            .fetch_one(self.connection())
            .await
            .map_err(infrastructure_error)
    }

    async fn save_user(&mut self, user: &User) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO users (id, email, display_name, version) VALUES ($1, $2, $3, 1)",
        )
        .bind(user.id)
        .bind(user.email())
        .bind(user.display_name())
        .execute(self.connection())
        .await
        .map_err(infrastructure_error)?;
        Ok(())
    }

    async fn find_preferences(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<UserPreferences>, DomainError> {
        sqlx::query_as::<_, UserPreferences>(
            "SELECT user_id, locale, notifications_enabled FROM user_preferences \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.connection())
        .await
        .map_err(infrastructure_error)
    }

    async fn insert_preferences(
        &mut self,
        preferences: &UserPreferences,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "INSERT INTO user_preferences (user_id, locale, notifications_enabled) \
             VALUES ($1, $2, $3) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(preferences.user_id)
        .bind(&preferences.locale)
        .bind(preferences.notifications_enabled)
        .execute(self.connection())
        .await
        .map_err(infrastructure_error)?;
        Ok(result.rows_affected() == 1)
    }
}

const VEHICLES: &str = "vehicles";
const WORKSHOPS: &str = "workshops";
const USERS: &str = "users";
const PREFERENCES: &str = "user_preferences";

#[derive(Serialize, Deserialize)]
struct VehicleDocument {
    plate: String,
    model: String,
    workshop_id: Option<Uuid>,
    version: i64,
}

#[derive(Serialize, Deserialize)]
struct WorkshopDocument {
    name: String,
    city: String,
    version: i64,
}

#[derive(Serialize, Deserialize)]
struct UserDocument {
    email: String,
    display_name: String,
    version: i64,
}

fn decode<T: serde::de::DeserializeOwned>(
    document: Option<serde_json::Value>,
) -> Result<Option<T>, DomainError> {
    document
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DomainError::Infrastructure(format!("corrupt document: {e}")))
}

fn encode<T: Serialize>(document: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(document)
        .map_err(|e| DomainError::Infrastructure(format!("document encoding failed: {e}")))
}

#[async_trait]
impl FleetWrites for LeaseTransaction {
    async fn find_vehicle(&mut self, id: Uuid) -> Result<Option<Vehicle>, DomainError> {
        let document: Option<VehicleDocument> = decode(self.get_document(VEHICLES, id)?)?;
        Ok(document.map(|d| Vehicle::restore(id, d.plate, d.model, d.workshop_id, d.version)))
    }

    async fn plate_in_use(&mut self, plate: &str) -> Result<bool, DomainError> {
        let plate = plate.trim().to_uppercase();
        Ok(self
            .documents(VEHICLES)?
            .iter()
            .any(|doc| doc["plate"].as_str() == Some(plate.as_str())))
    }

    async fn save_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), DomainError> {
        let stored: Option<VehicleDocument> = decode(self.get_document(VEHICLES, vehicle.id)?)?;
        match stored {
            None if vehicle.version == 0 => {}
            Some(doc) if doc.version == vehicle.version => {}
            _ => return Err(conflict(vehicle.id, vehicle.version)),
        }
        let document = encode(&VehicleDocument {
            plate: vehicle.plate().to_owned(),
            model: vehicle.model().to_owned(),
            workshop_id: vehicle.workshop_id(),
            version: vehicle.version + 1,
        })?;
        self.put_document(VEHICLES, vehicle.id, document)?;
        Ok(())
    }

    async fn delete_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), DomainError> {
        let stored: Option<VehicleDocument> = decode(self.get_document(VEHICLES, vehicle.id)?)?;
        match stored {
            Some(doc) if doc.version == vehicle.version => {
                self.delete_document(VEHICLES, vehicle.id)
            }
            _ => Err(conflict(vehicle.id, vehicle.version)),
        }
    }

    async fn find_workshop(&mut self, id: Uuid) -> Result<Option<Workshop>, DomainError> {
        let document: Option<WorkshopDocument> = decode(self.get_document(WORKSHOPS, id)?)?;
        Ok(document.map(|d| Workshop::restore(id, d.name, d.city, d.version)))
    }

    async fn save_workshop(&mut self, workshop: &Workshop) -> Result<(), DomainError> {
        if self.get_document(WORKSHOPS, workshop.id)?.is_some() {
            return Err(conflict(workshop.id, workshop.version));
        }
        let document = encode(&WorkshopDocument {
            name: workshop.name().to_owned(),
            city: workshop.city().to_owned(),
            version: 1,
        })?;
        self.put_document(WORKSHOPS, workshop.id, document)?;
        Ok(())
    }

    async fn find_user(&mut self, id: Uuid) -> Result<Option<User>, DomainError> {
        let document: Option<UserDocument> = decode(self.get_document(USERS, id)?)?;
        Ok(document.map(|d| User::restore(id, d.email, d.display_name, d.version)))
    }

    async fn email_in_use(&mut self, email: &str) -> Result<bool, DomainError> {
        let email = email.trim().to_lowercase();
        Ok(self
            .documents(USERS)?
            .iter()
            .any(|doc| doc["email"].as_str() == Some(email.as_str())))
    }

    async fn save_user(&mut self, user: &User) -> Result<(), DomainError> {
        if self.get_document(USERS, user.id)?.is_some() {
            return Err(conflict(user.id, user.version));
        }
        let document = encode(&UserDocument {
            email: user.email().to_owned(),
            display_name: user.display_name().to_owned(),
            version: 1,
        })?;
        self.put_document(USERS, user.id, document)?;
        Ok(())
    }

    async fn find_preferences(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<UserPreferences>, DomainError> {
        decode(self.get_document(PREFERENCES, user_id)?)
    }

    async fn insert_preferences(
        &mut self,
        preferences: &UserPreferences,
    ) -> Result<bool, DomainError> {
        if self.get_document(PREFERENCES, preferences.user_id)?.is_some() {
            return Ok(false);
        }
        let document = encode(preferences)?;
        self.put_document(PREFERENCES, preferences.user_id, document)?;
        Ok(true)
    }
}
