//! Per-modality model lifecycle: `Unloaded → Loading → Ready | Error`, and
//! `Disposed` from anywhere.
//!
//! A controller owns at most one in-flight load. Callers that arrive while a
//! load is running clone the same [`Shared`] future and therefore observe the
//! same outcome; the engine's `load` runs once per attempt no matter how many
//! callers are waiting. The state lock is a plain `std::sync::Mutex` and is
//! never held across an `.await`.

use crate::api::{Modality, ModalityConfig};
use crate::cache::{ProgressSender, resolve_cache_dir};
use crate::device::{self, CapabilityDescriptor, resolve_backend};
use crate::error::{Result, RuntimeError};
use crate::traits::{
    EmbeddingModel, GeneratorModel, LoadRequest, LoadedModelHandle, ModelEngine,
    SpeechRecognitionModel, SpeechSynthesisModel,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Externally visible snapshot of a controller's state.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    /// The last load failed. A new `ensure_loaded` retries.
    Error(RuntimeError),
    Disposed,
}

impl ModelState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::Error(e) => write!(f, "error ({})", e),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}

/// Everything a configured controller needs to load its model.
#[derive(Clone)]
pub struct ModelBinding {
    pub config: ModalityConfig,
    pub engine: Arc<dyn ModelEngine>,
    pub cache_dir: PathBuf,
    /// Fixed host capabilities. [`device::detect`] is used when `None`.
    pub capabilities: Option<CapabilityDescriptor>,
    pub progress: Option<ProgressSender>,
}

impl ModelBinding {
    /// Bind `config` to `engine` with the default cache location and detected
    /// capabilities.
    pub fn new(config: ModalityConfig, engine: Arc<dyn ModelEngine>) -> Self {
        let cache_dir = resolve_cache_dir(
            config.cache_dir.as_deref(),
            None,
            engine.engine_id(),
            &config.model,
        );
        Self {
            config,
            engine,
            cache_dir,
            capabilities: None,
            progress: None,
        }
    }
}

impl std::fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBinding")
            .field("model", &self.config.model)
            .field("engine", &self.engine.engine_id())
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<LoadedModelHandle>>>;

enum Slot {
    Unloaded,
    Loading { generation: u64, load: SharedLoad },
    Ready(LoadedModelHandle),
    Error(RuntimeError),
    Disposed,
}

struct Inner {
    slot: Slot,
    next_generation: u64,
}

/// Owns one modality's model and serializes its loading.
pub struct LifecycleController {
    modality: Modality,
    binding: Option<Arc<ModelBinding>>,
    inner: Mutex<Inner>,
    active_streams: AtomicUsize,
}

impl LifecycleController {
    /// A controller that will load `binding` on demand.
    pub fn new(modality: Modality, binding: ModelBinding) -> Self {
        Self::with_binding(modality, Some(Arc::new(binding)))
    }

    /// A controller for a modality absent from (or skipped in) the
    /// configuration. Every load fails with `ModelNotConfigured`.
    pub fn unconfigured(modality: Modality) -> Self {
        Self::with_binding(modality, None)
    }

    fn with_binding(modality: Modality, binding: Option<Arc<ModelBinding>>) -> Self {
        Self {
            modality,
            binding,
            inner: Mutex::new(Inner {
                slot: Slot::Unloaded,
                next_generation: 0,
            }),
            active_streams: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn is_configured(&self) -> bool {
        self.binding.is_some()
    }

    /// The configured model id, if any.
    pub fn model_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.config.model.as_str())
    }

    /// The engine bound to this modality, if any.
    pub fn engine_id(&self) -> Option<&'static str> {
        self.binding.as_ref().map(|b| b.engine.engine_id())
    }

    pub fn state(&self) -> ModelState {
        match &self.lock().slot {
            Slot::Unloaded => ModelState::Unloaded,
            Slot::Loading { .. } => ModelState::Loading,
            Slot::Ready(_) => ModelState::Ready,
            Slot::Error(e) => ModelState::Error(e.clone()),
            Slot::Disposed => ModelState::Disposed,
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.lock().slot, Slot::Disposed)
    }

    /// Number of token streams currently open against this modality.
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    pub(crate) fn stream_opened(&self) {
        self.active_streams.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn stream_closed(&self) {
        self.active_streams.fetch_sub(1, Ordering::SeqCst);
    }

    /// Load the model unless it is already loaded, joining a load that is
    /// already running.
    ///
    /// Every caller joined to the same attempt receives the same handle or the
    /// same error.
    #[tracing::instrument(skip(self), fields(modality = %self.modality))]
    pub async fn ensure_loaded(&self) -> Result<LoadedModelHandle> {
        let (generation, load) = {
            let mut inner = self.lock();
            if matches!(inner.slot, Slot::Disposed) {
                return Err(RuntimeError::Disposed(self.modality));
            }
            let Some(binding) = &self.binding else {
                return Err(RuntimeError::ModelNotConfigured(self.modality));
            };
            match &inner.slot {
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Loading { generation, load } => {
                    tracing::debug!("Joining in-flight load");
                    (*generation, load.clone())
                }
                Slot::Unloaded | Slot::Error(_) | Slot::Disposed => {
                    inner.next_generation += 1;
                    let generation = inner.next_generation;
                    let load = run_load(self.modality, Arc::clone(binding))
                        .boxed()
                        .shared();
                    inner.slot = Slot::Loading {
                        generation,
                        load: load.clone(),
                    };
                    (generation, load)
                }
            }
        };

        let outcome = load.await;
        self.settle(generation, outcome)
    }

    /// Record the outcome of load attempt `generation`, unless the controller
    /// moved on in the meantime.
    fn settle(
        &self,
        generation: u64,
        outcome: Result<LoadedModelHandle>,
    ) -> Result<LoadedModelHandle> {
        let mut inner = self.lock();
        match &inner.slot {
            Slot::Disposed => {
                if outcome.is_ok() {
                    tracing::info!(
                        modality = %self.modality,
                        "Load finished after dispose; releasing the model"
                    );
                }
                return Err(RuntimeError::Disposed(self.modality));
            }
            Slot::Loading {
                generation: current,
                ..
            } if *current == generation => {}
            _ => return outcome,
        }
        inner.slot = match &outcome {
            Ok(handle) => Slot::Ready(handle.clone()),
            Err(e) => Slot::Error(e.clone()),
        };
        outcome
    }

    /// The loaded handle, loading it first when `auto_warmup` is set.
    ///
    /// A load already in flight is always joined. Without auto-warmup an
    /// unloaded or failed modality reports `ModelNotLoaded`.
    pub async fn handle(&self, auto_warmup: bool) -> Result<LoadedModelHandle> {
        let loading = {
            let inner = self.lock();
            match &inner.slot {
                Slot::Disposed => return Err(RuntimeError::Disposed(self.modality)),
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Loading { .. } => true,
                Slot::Unloaded | Slot::Error(_) => false,
            }
        };
        if self.binding.is_none() {
            return Err(RuntimeError::ModelNotConfigured(self.modality));
        }
        if !loading && !auto_warmup {
            return Err(RuntimeError::ModelNotLoaded(self.modality));
        }
        self.ensure_loaded().await
    }

    /// Fail with `Disposed` if the controller was disposed, e.g. while an
    /// inference call was awaiting.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(RuntimeError::Disposed(self.modality));
        }
        Ok(())
    }

    /// Release the model (if loaded) and move to `Disposed`. Idempotent.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut self.lock().slot, Slot::Disposed);
        match previous {
            Slot::Disposed => tracing::debug!(modality = %self.modality, "Already disposed"),
            Slot::Ready(handle) => {
                drop(handle);
                tracing::info!(modality = %self.modality, "Disposed loaded model");
            }
            Slot::Loading { .. } => {
                tracing::info!(modality = %self.modality, "Disposed while loading");
            }
            Slot::Unloaded | Slot::Error(_) => {
                tracing::debug!(modality = %self.modality, "Disposed unloaded modality");
            }
        }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("modality", &self.modality)
            .field("binding", &self.binding)
            .field("state", &self.state())
            .finish()
    }
}

/// One load attempt. Runs once per generation no matter how many callers
/// await it.
async fn run_load(modality: Modality, binding: Arc<ModelBinding>) -> Result<LoadedModelHandle> {
    let caps = binding.capabilities.unwrap_or_else(device::detect);
    let backend = resolve_backend(&binding.config, &caps);
    let request = LoadRequest {
        modality,
        model_id: binding.config.model.clone(),
        revision: binding.config.revision.clone(),
        backend,
        cache_dir: binding.cache_dir.clone(),
        options: binding.config.options.clone(),
        progress: binding.progress.clone(),
    };
    let engine_id = binding.engine.engine_id();

    tracing::info!(
        modality = %modality,
        model = %request.model_id,
        engine = %engine_id,
        device = %backend.device,
        dtype = %backend.dtype,
        "Loading model"
    );
    let start = Instant::now();

    let load = async {
        let handle = binding.engine.load(&request).await?;
        warm_handle(modality, &handle).await?;
        Ok::<_, RuntimeError>(handle)
    };
    let outcome = match binding.config.load_timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), load)
            .await
            .unwrap_or_else(|_| {
                Err(RuntimeError::load_failed(
                    modality,
                    format!("load timed out after {}s", secs),
                ))
            }),
        None => load.await,
    };
    let outcome = outcome.map_err(|e| match e {
        RuntimeError::LoadFailed { .. } => e,
        other => RuntimeError::load_failed(modality, other),
    });

    metrics::histogram!("model_load.duration_seconds").record(start.elapsed().as_secs_f64());
    match &outcome {
        Ok(_) => {
            metrics::counter!("model_load.total", "status" => "success").increment(1);
            tracing::info!(
                modality = %modality,
                model = %request.model_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Model ready"
            );
        }
        Err(e) => {
            metrics::counter!("model_load.total", "status" => "failure").increment(1);
            tracing::error!(modality = %modality, model = %request.model_id, error = %e, "Model load failed");
        }
    }
    outcome
}

/// Recover the typed model from a type-erased handle.
pub(crate) fn downcast_model<T: ?Sized + Send + Sync + 'static>(
    modality: Modality,
    handle: &LoadedModelHandle,
) -> Result<Arc<T>> {
    handle.downcast_ref::<Arc<T>>().cloned().ok_or_else(|| {
        RuntimeError::CapabilityMismatch(format!(
            "Engine returned a handle that is not a {} model",
            modality
        ))
    })
}

/// Run the model's own warmup hook, checking the handle type on the way.
async fn warm_handle(modality: Modality, handle: &LoadedModelHandle) -> Result<()> {
    match modality {
        Modality::Llm => {
            downcast_model::<dyn GeneratorModel>(modality, handle)?
                .warmup()
                .await
        }
        Modality::Embedding => {
            downcast_model::<dyn EmbeddingModel>(modality, handle)?
                .warmup()
                .await
        }
        Modality::Tts => {
            downcast_model::<dyn SpeechSynthesisModel>(modality, handle)?
                .warmup()
                .await
        }
        Modality::Asr => {
            downcast_model::<dyn SpeechRecognitionModel>(modality, handle)?
                .warmup()
                .await
        }
    }
}
