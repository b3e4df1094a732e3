use async_trait::async_trait;
use log::{debug, info};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema, Set,
};

use super::db_entities::{images, users};
use super::{Identity, IdentityStore, ImageCatalog, ImageRecord};
use crate::error_handling::types::DirectoryError;

/// Identity store and image catalog read from a SQL database.
pub struct DatabaseDirectory {
    db: DatabaseConnection,
}

impl DatabaseDirectory {
    /// Connects to `url` (e.g. `sqlite://vmgate.sqlite3?mode=rwc`) and creates the tables
    /// if they don't exist yet.
    pub async fn connect(url: &str) -> Result<Self, DirectoryError> {
        let db = Database::connect(url)
            .await
            .map_err(|e| DirectoryError::ConnectionFailed(e.to_string()))?;

        let directory = Self { db };
        directory.create_schema().await?;
        info!("Directory database ready");
        Ok(directory)
    }

    async fn create_schema(&self) -> Result<(), DirectoryError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let mut users_table = schema.create_table_from_entity(users::Entity);
        users_table.if_not_exists();
        let mut images_table = schema.create_table_from_entity(images::Entity);
        images_table.if_not_exists();

        for statement in [backend.build(&users_table), backend.build(&images_table)] {
            self.db
                .execute(statement)
                .await
                .map_err(|e| DirectoryError::QueryFailed(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn add_user(&self, caller_id: &str, active: bool) -> Result<(), DirectoryError> {
        users::ActiveModel {
            id: Set(caller_id.to_string()),
            active: Set(active),
        }
        .insert(&self.db)
        .await
        .map_err(|e| DirectoryError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn add_image(&self, image_id: &str, filename: &str) -> Result<(), DirectoryError> {
        images::ActiveModel {
            image_id: Set(image_id.to_string()),
            filename: Set(filename.to_string()),
        }
        .insert(&self.db)
        .await
        .map_err(|e| DirectoryError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for DatabaseDirectory {
    async fn lookup(&self, caller_id: &str) -> Result<Option<Identity>, DirectoryError> {
        let user = users::Entity::find_by_id(caller_id.to_string())
            .one(&self.db)
            .await
            .map_err(|e| DirectoryError::QueryFailed(e.to_string()))?;
        debug!("User lookup for {}: {}", caller_id, user.is_some());

        Ok(user.map(|user| Identity {
            caller_id: user.id,
            active: user.active,
        }))
    }
}

#[async_trait]
impl ImageCatalog for DatabaseDirectory {
    async fn lookup(&self, image_id: &str) -> Result<Option<ImageRecord>, DirectoryError> {
        let image = images::Entity::find_by_id(image_id.to_string())
            .one(&self.db)
            .await
            .map_err(|e| DirectoryError::QueryFailed(e.to_string()))?;
        debug!("Image lookup for {}: {}", image_id, image.is_some());

        Ok(image.map(|image| ImageRecord {
            image_id: image.image_id,
            filename: image.filename,
        }))
    }
}
