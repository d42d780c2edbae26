// src/test_utils/images.rs
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::errors::ExecutorError;
use crate::pooler::{FilesystemImage, ImageBuilder};
use crate::resources::ImageFamily;

/// Produces images instantly (or after a fixed delay) and counts calls.
#[derive(Debug, Default)]
pub struct CountingImageBuilder {
    built: AtomicUsize,
    discarded: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
}

impl CountingImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_builds(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBuilder for CountingImageBuilder {
    async fn build(&self, family: ImageFamily, id: Uuid) -> Result<FilesystemImage, ExecutorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExecutorError::infrastructure("image build failed"));
        }
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(FilesystemImage {
            id,
            family,
            path: format!("/images/{}-{}.ext4", family, id).into(),
            content_hash: Some(format!("{:064x}", id.as_u128())),
            built_at: SystemTime::now(),
        })
    }

    async fn discard(&self, _image: &FilesystemImage) -> Result<(), ExecutorError> {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
