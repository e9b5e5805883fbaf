use async_trait::async_trait;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::backend::ContainerBackend;
use crate::error_handling::types::ManagerError;

/// Batch existence check for the images a deployment needs.
#[async_trait]
pub trait ImageChecker: Send + Sync {
    async fn check_from_list(&self, images: &BTreeSet<String>) -> Result<(), ManagerError>;
}

/// Checks images against the runtime's local image store.
pub struct BackendImageChecker {
    backend: Arc<dyn ContainerBackend>,
}

impl BackendImageChecker {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ImageChecker for BackendImageChecker {
    async fn check_from_list(&self, images: &BTreeSet<String>) -> Result<(), ManagerError> {
        info!("Checking {} image(s)", images.len());
        for image in images {
            if !self.backend.image_exists(image).await? {
                return Err(ManagerError::ImageNotFound(image.clone()));
            }
            debug!("Image {} is available", image);
        }
        Ok(())
    }
}
