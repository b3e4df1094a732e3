use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::{Identity, IdentityStore, ImageCatalog, ImageRecord};
use crate::configuration::types::DirectoryConfig;
use crate::error_handling::types::DirectoryError;

/// Identity store and image catalog taken from the configuration file.
///
/// Every listed user is active. Image filenames come from the configured template.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: HashSet<String>,
    images: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        let images = config
            .images
            .iter()
            .map(|image_id| {
                (
                    image_id.clone(),
                    config.image_filename_template.replace("{image_id}", image_id),
                )
            })
            .collect();

        Self {
            users: config.users.iter().cloned().collect(),
            images,
        }
    }

    pub fn with_user(mut self, caller_id: &str) -> Self {
        self.users.insert(caller_id.to_string());
        self
    }

    pub fn with_image(mut self, image_id: &str, filename: &str) -> Self {
        self.images
            .insert(image_id.to_string(), filename.to_string());
        self
    }
}

#[async_trait]
impl IdentityStore for StaticDirectory {
    async fn lookup(&self, caller_id: &str) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.users.get(caller_id).map(|id| Identity {
            caller_id: id.clone(),
            active: true,
        }))
    }
}

#[async_trait]
impl ImageCatalog for StaticDirectory {
    async fn lookup(&self, image_id: &str) -> Result<Option<ImageRecord>, DirectoryError> {
        Ok(self.images.get(image_id).map(|filename| ImageRecord {
            image_id: image_id.to_string(),
            filename: filename.clone(),
        }))
    }
}
