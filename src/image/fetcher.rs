//! Image fetcher

use super::ImageReference;
use crate::error::Result;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Ensures images are present in the runtime's local store.
///
/// There is no separate "is it already here" check: the pull is always issued
/// and awaited, and an image that is already present makes it a no-op.
#[derive(Clone)]
pub struct ImageFetcher {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageFetcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Pull `image` and wait for the pull to finish. Failures are not retried.
    pub async fn fetch(&self, image: &ImageReference) -> Result<()> {
        info!("Pulling image {}", image);
        let started = Instant::now();

        match self.runtime.pull_image(image).await {
            Ok(()) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Image {} is available",
                    image
                );
                Ok(())
            }
            Err(e) => {
                warn!("Pull of {} failed: {}", image, e);
                Err(e)
            }
        }
    }
}
