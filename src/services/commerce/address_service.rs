use crate::{entities::address, errors::ServiceError};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const ADDRESS_NOT_FOUND_MESSAGE: &str = "Address not found.";

/// Ownership-checked address lookups.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetches an address only if it belongs to `user_id`.
    ///
    /// Absent and foreign addresses produce the same `NotFound`, so callers
    /// cannot probe for other users' address ids.
    #[instrument(skip(self))]
    pub async fn find_owned(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        let found = address::Entity::find()
            .filter(address::Column::Id.eq(address_id))
            .filter(address::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        found.ok_or_else(|| {
            debug!(%address_id, %user_id, "address not owned by caller or missing");
            ServiceError::NotFound(ADDRESS_NOT_FOUND_MESSAGE.to_string())
        })
    }
}
