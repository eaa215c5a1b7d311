use snafu::OptionExt;
use std::{
    cell::Cell,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};
use tracing::*;

use crate::{
    buffer::ImageBuffer,
    classify::{ClassificationResult, ClassifyConfig},
    crop::params::CropSpecification,
    descriptor::Descriptor,
    error::*,
    inference::{config::EngineConfig, engine::InferenceEngine},
};

/// Owns an initialized engine until [`dispose`](Self::dispose).
///
/// A handle is `Send` but not `Sync`: it may move to another thread but is
/// never shared by reference. Parallel callers either initialize one handle
/// per worker or go through [`SharedEngine`].
///
/// After `dispose` every operation, including a second `dispose`, fails with
/// [`MmrError::DisposedHandle`]. A handle dropped while live is released by
/// `Drop` with a warning.
pub struct EngineHandle<E: InferenceEngine> {
    engine: Option<E>,
    config: EngineConfig,
    _not_sync: PhantomData<Cell<()>>,
}

impl<E: InferenceEngine> EngineHandle<E> {
    #[instrument(skip_all, fields(model = %config.model_name))]
    pub fn initialize(config: EngineConfig) -> Result<Self, MmrError> {
        let started = Instant::now();
        let engine = E::initialize(&config)?;
        info!(
            "engine ready in {:?}, model version {}",
            started.elapsed(),
            engine.model_version()
        );

        Ok(Self {
            engine: Some(engine),
            config,
            _not_sync: PhantomData,
        })
    }

    /// Runs `f` on a fresh handle and disposes it on every path out.
    ///
    /// `f` may dispose the handle itself. The error of `f` wins over a
    /// disposal error.
    pub fn scoped<T, F>(config: EngineConfig, f: F) -> Result<T, MmrError>
    where
        F: FnOnce(&mut Self) -> Result<T, MmrError>,
    {
        let mut handle = Self::initialize(config)?;
        let result = f(&mut handle);
        let released = if handle.is_live() {
            handle.dispose()
        } else {
            Ok(())
        };
        let value = result?;
        released?;
        Ok(value)
    }

    pub fn is_live(&self) -> bool {
        self.engine.is_some()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn live(&self, operation: &str) -> Result<&E, MmrError> {
        self.engine
            .as_ref()
            .context(DisposedHandleSnafu { operation })
    }

    fn live_mut(&mut self, operation: &str) -> Result<&mut E, MmrError> {
        self.engine
            .as_mut()
            .context(DisposedHandleSnafu { operation })
    }

    pub fn model_name(&self) -> Result<&str, MmrError> {
        Ok(self.live("model_name")?.model_name())
    }

    pub fn model_version(&self) -> Result<u32, MmrError> {
        Ok(self.live("model_version")?.model_version())
    }

    pub fn descriptor_len(&self) -> Result<usize, MmrError> {
        Ok(self.live("descriptor_len")?.descriptor_len())
    }

    pub fn supports_batch(&self) -> Result<bool, MmrError> {
        Ok(self.live("supports_batch")?.supports_batch())
    }

    pub fn crop_image(
        &mut self,
        image: &ImageBuffer,
        spec: &CropSpecification,
    ) -> Result<ImageBuffer, MmrError> {
        self.live_mut("crop_image")?.crop_image(image, spec)
    }

    pub fn compute_descriptor(&mut self, image: &ImageBuffer) -> Result<Descriptor, MmrError> {
        self.live_mut("compute_descriptor")?.compute_descriptor(image)
    }

    pub fn compute_descriptor_batch(
        &mut self,
        images: &[ImageBuffer],
    ) -> Result<Vec<Descriptor>, MmrError> {
        let engine = self.live_mut("compute_descriptor_batch")?;
        let descriptors = engine.compute_descriptor_batch(images)?;
        debug!("batch of {} descriptors", descriptors.len());
        Ok(descriptors)
    }

    pub fn classify(&mut self, descriptor: &Descriptor) -> Result<ClassificationResult, MmrError> {
        self.classify_with(descriptor, &ClassifyConfig::default())
    }

    pub fn classify_with(
        &mut self,
        descriptor: &Descriptor,
        config: &ClassifyConfig,
    ) -> Result<ClassificationResult, MmrError> {
        self.live_mut("classify")?.classify(descriptor, config)
    }

    /// Similarity of two descriptors produced by this engine's model.
    pub fn compare(&self, a: &Descriptor, b: &Descriptor) -> Result<f32, MmrError> {
        let engine = self.live("compare")?;
        a.ensure_shape(engine.descriptor_len(), engine.model_version())?;
        a.compare(b)
    }

    pub fn dispose(&mut self) -> Result<(), MmrError> {
        let engine = self
            .engine
            .take()
            .context(DisposedHandleSnafu {
                operation: "dispose",
            })?;
        engine.dispose();
        info!("engine `{}` disposed", self.config.model_name);
        Ok(())
    }
}

impl<E: InferenceEngine> Drop for EngineHandle<E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            warn!(
                "engine `{}` dropped without dispose, releasing",
                self.config.model_name
            );
            engine.dispose();
        }
    }
}

/// An [`EngineHandle`] shared across threads; every call runs under one
/// lock, so calls are serialized.
pub struct SharedEngine<E: InferenceEngine> {
    inner: Arc<Mutex<EngineHandle<E>>>,
}

impl<E: InferenceEngine> Clone for SharedEngine<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: InferenceEngine> SharedEngine<E> {
    pub fn new(handle: EngineHandle<E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(handle)),
        }
    }

    pub fn initialize(config: EngineConfig) -> Result<Self, MmrError> {
        EngineHandle::initialize(config).map(Self::new)
    }

    /// Runs `f` with exclusive access to the handle.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut EngineHandle<E>) -> Result<T, MmrError>,
    ) -> Result<T, MmrError> {
        // A panic elsewhere leaves the handle consistent; its state lives in
        // `Option<E>` and is only ever taken whole.
        let mut handle = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut handle)
    }

    pub fn crop_image(
        &self,
        image: &ImageBuffer,
        spec: &CropSpecification,
    ) -> Result<ImageBuffer, MmrError> {
        self.with(|handle| handle.crop_image(image, spec))
    }

    pub fn compute_descriptor(&self, image: &ImageBuffer) -> Result<Descriptor, MmrError> {
        self.with(|handle| handle.compute_descriptor(image))
    }

    pub fn classify(&self, descriptor: &Descriptor) -> Result<ClassificationResult, MmrError> {
        self.with(|handle| handle.classify(descriptor))
    }

    /// Disposes the inner handle; later calls through any clone fail.
    pub fn dispose(&self) -> Result<(), MmrError> {
        self.with(|handle| handle.dispose())
    }
}
