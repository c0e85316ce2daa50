pub mod config;
pub mod outputs;
pub mod providers;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use moodboard_contracts::bbox::{resolve_bounding_box, RegionInput};
use moodboard_contracts::events::{EventLog, EventPayload};
use moodboard_contracts::grid::ImageDimensions;
use moodboard_contracts::grounding::needs_search_grounding;
use moodboard_contracts::models::{ModelSelector, ModelSpec, DEFAULT_ASPECT_RATIO, THINKING};
use moodboard_contracts::templates::{build, build_edit, TemplateKind, TemplateStore};
use moodboard_contracts::{MoodboardError, Result};
use serde_json::{json, Value};

pub use config::{EngineConfig, ProviderKind};
pub use outputs::{AssetKind, OutputStore};
pub use providers::{DryrunProvider, GeminiProvider, ImageCall, ImageCallResponse, ImageProvider};

pub const MAX_BATCH_WORKERS: usize = 4;
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub subject: String,
    pub model: Option<String>,
    pub template_override: Option<String>,
    pub include_reasoning: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditSource {
    /// A path, temp path or URL naming an earlier board.
    Path(String),
    /// Encoded image bytes with no file behind them.
    Image(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub source: Option<EditSource>,
    pub coordinates: RegionInput,
    pub edit_request: String,
    pub model: Option<String>,
    pub template_override: Option<String>,
    pub include_reasoning: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub prompt: String,
    pub count: usize,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedAsset {
    pub kind: AssetKind,
    pub path: PathBuf,
    pub png: Vec<u8>,
    pub dimensions: ImageDimensions,
    pub model: String,
    pub search_grounding: bool,
    /// Empty unless reasoning was requested.
    pub reasoning: String,
}

pub struct MoodboardEngine {
    provider: Arc<dyn ImageProvider>,
    templates: TemplateStore,
    outputs: OutputStore,
    events: Option<EventLog>,
    models: ModelSelector,
    default_model: Option<String>,
}

impl MoodboardEngine {
    pub fn new(provider: Arc<dyn ImageProvider>, config: &EngineConfig) -> Result<Self> {
        let outputs = OutputStore::new(&config.output_dir);
        outputs.ensure()?;
        let session = uuid::Uuid::new_v4().simple().to_string();
        Ok(Self {
            provider,
            templates: TemplateStore::new(&config.template_dir),
            events: Some(EventLog::new(outputs.dir().join(EVENTS_FILE), session)),
            outputs,
            models: ModelSelector::default(),
            default_model: config.effective_default_model().map(str::to_string),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.build_provider()?, config)
    }

    pub fn without_events(mut self) -> Self {
        self.events = None;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn outputs(&self) -> &OutputStore {
        &self.outputs
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn events(&self) -> Option<&EventLog> {
        self.events.as_ref()
    }

    pub fn generate(&self, request: GenerateRequest) -> Result<GeneratedAsset> {
        let result = self.generate_inner(&request);
        self.observe("generate", result)
    }

    pub fn edit_region(&self, request: EditRequest) -> Result<GeneratedAsset> {
        let result = self.edit_inner(&request);
        self.observe("edit", result)
    }

    /// Sends the same prompt `count` times on at most [`MAX_BATCH_WORKERS`]
    /// threads and keeps every image that comes back, in completion order.
    pub fn generate_batch(&self, request: BatchRequest) -> Result<Vec<GeneratedAsset>> {
        let result = self.batch_inner(&request);
        self.observe("batch", result)
    }

    fn generate_inner(&self, request: &GenerateRequest) -> Result<GeneratedAsset> {
        let subject = request.subject.trim();
        if subject.is_empty() {
            return Err(MoodboardError::validation(
                "Input cannot be empty. Please describe the fashion moodboard subject.",
            ));
        }
        let model = self.select_model(request.model.as_deref(), "image")?;
        let template = self
            .templates
            .resolve(TemplateKind::Generation, request.template_override.as_deref())?;
        let prompt = build(subject, template);
        let search_grounding = needs_search_grounding(&prompt);

        let call = image_call(&model, prompt, None, search_grounding, request.include_reasoning);
        let response = self.call_provider(&call)?;
        let image = response.first_image().ok_or(MoodboardError::UpstreamEmpty)?;
        let path = self.outputs.next_path(AssetKind::Generated);
        let saved = self.outputs.persist(image, &path)?;

        let asset = GeneratedAsset {
            kind: AssetKind::Generated,
            path,
            png: saved.png,
            dimensions: saved.dimensions,
            model: model.name,
            search_grounding,
            reasoning: reasoning_for(&response, request.include_reasoning),
        };
        self.record_artifact(&asset);
        Ok(asset)
    }

    fn edit_inner(&self, request: &EditRequest) -> Result<GeneratedAsset> {
        let (source_bytes, original_path) = match request.source.as_ref() {
            Some(EditSource::Path(reference)) if !reference.trim().is_empty() => {
                let path = self.outputs.resolve_reference(reference)?;
                (std::fs::read(&path)?, Some(path))
            }
            Some(EditSource::Image(bytes)) if !bytes.is_empty() => (bytes.clone(), None),
            _ => {
                return Err(MoodboardError::validation(
                    "No image available. Please generate an image first or provide an image file.",
                ))
            }
        };

        let edit_request = request.edit_request.trim();
        if edit_request.is_empty() {
            return Err(MoodboardError::validation("Edit request cannot be empty."));
        }

        let source = outputs::decode(&source_bytes)?;
        let dims = outputs::dimensions_of(&source)?;
        let bbox = resolve_bounding_box(&request.coordinates, dims)?;

        let model = self.select_model(request.model.as_deref(), "edit")?;
        let template = self
            .templates
            .resolve(TemplateKind::Edit, request.template_override.as_deref())?;
        let prompt = build_edit(bbox.as_ref(), edit_request, template, Some(dims));
        tracing::debug!(
            region = ?bbox,
            width = dims.width(),
            height = dims.height(),
            "built edit prompt"
        );

        let source_png = outputs::encode_png(&source)?;
        let call = image_call(&model, prompt, Some(source_png), false, request.include_reasoning);
        let response = self.call_provider(&call)?;
        let image = response.first_image().ok_or(MoodboardError::UpstreamEmpty)?;

        let path = match original_path {
            Some(path) if path.is_file() => path,
            _ => self.outputs.next_path(AssetKind::Edited),
        };
        let saved = self.outputs.persist(image, &path)?;

        let asset = GeneratedAsset {
            kind: AssetKind::Edited,
            path,
            png: saved.png,
            dimensions: saved.dimensions,
            model: model.name,
            search_grounding: false,
            reasoning: reasoning_for(&response, request.include_reasoning),
        };
        self.record_artifact(&asset);
        Ok(asset)
    }

    fn batch_inner(&self, request: &BatchRequest) -> Result<Vec<GeneratedAsset>> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(MoodboardError::validation("Prompt cannot be empty."));
        }
        if request.count == 0 {
            return Err(MoodboardError::validation(
                "Batch count must be at least 1.",
            ));
        }
        let model = self.select_model(request.model.as_deref(), "image")?;
        let call = image_call(&model, prompt.to_string(), None, false, false);
        let workers = request.count.min(MAX_BATCH_WORKERS);
        let next_job = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<anyhow::Result<ImageCallResponse>>();

        let mut assets = Vec::new();
        let mut first_error: Option<anyhow::Error> = None;
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (call, next_job, provider) = (&call, &next_job, &self.provider);
                scope.spawn(move || {
                    while next_job.fetch_add(1, Ordering::SeqCst) < request.count {
                        if tx.send(provider.generate(call)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for outcome in rx {
                match outcome {
                    Ok(response) => {
                        let Some(image) = response.first_image() else {
                            tracing::warn!("batch worker got a response without image data");
                            continue;
                        };
                        let path = self.outputs.next_path(AssetKind::Generated);
                        match self.outputs.persist(image, &path) {
                            Ok(saved) => {
                                let asset = GeneratedAsset {
                                    kind: AssetKind::Generated,
                                    path,
                                    png: saved.png,
                                    dimensions: saved.dimensions,
                                    model: model.name.clone(),
                                    search_grounding: false,
                                    reasoning: String::new(),
                                };
                                self.record_artifact(&asset);
                                assets.push(asset);
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "dropping unreadable batch image")
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = ?err, "batch worker failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
        });

        tracing::info!(requested = request.count, produced = assets.len(), "batch finished");
        if assets.is_empty() {
            return Err(first_error.map_or(MoodboardError::UpstreamEmpty, MoodboardError::Upstream));
        }
        Ok(assets)
    }

    fn select_model(&self, requested: Option<&str>, capability: &str) -> Result<ModelSpec> {
        let requested = requested.or(self.default_model.as_deref());
        let selection = self
            .models
            .select(requested, capability)
            .map_err(MoodboardError::configuration)?;
        if let (Some(reason), Some(_)) = (&selection.fallback_reason, &selection.requested) {
            tracing::warn!(model = %selection.model.name, "{reason}");
        }
        Ok(selection.model)
    }

    fn call_provider(&self, call: &ImageCall) -> Result<ImageCallResponse> {
        tracing::info!(
            provider = self.provider.name(),
            model = %call.model,
            grounding = call.search_grounding,
            "requesting image"
        );
        let response = self.provider.generate(call)?;
        for warning in &response.warnings {
            tracing::warn!("{warning}");
        }
        Ok(response)
    }

    fn record_artifact(&self, asset: &GeneratedAsset) {
        let mut payload = EventPayload::new();
        payload.insert("kind".to_string(), json!(asset.kind.as_str()));
        payload.insert(
            "path".to_string(),
            json!(asset.path.to_string_lossy().to_string()),
        );
        payload.insert("model".to_string(), json!(asset.model));
        payload.insert("width".to_string(), json!(asset.dimensions.width()));
        payload.insert("height".to_string(), json!(asset.dimensions.height()));
        payload.insert("search_grounding".to_string(), json!(asset.search_grounding));
        self.record("artifact_created", payload);
    }

    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let mut payload = EventPayload::new();
            payload.insert("operation".to_string(), json!(operation));
            payload.insert("error".to_string(), Value::String(format!("{err:#}")));
            self.record("request_failed", payload);
        }
        result
    }

    fn record(&self, event: &str, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.record(event, payload) {
            tracing::warn!(error = %err, path = %events.path().display(), "failed to append event");
        }
    }
}

fn image_call(
    model: &ModelSpec,
    prompt: String,
    source_image: Option<Vec<u8>>,
    search_grounding: bool,
    include_reasoning: bool,
) -> ImageCall {
    ImageCall {
        model: model.name.clone(),
        prompt,
        source_image,
        aspect_ratio: Some(DEFAULT_ASPECT_RATIO.to_string()),
        image_size: model.image_size.clone(),
        search_grounding,
        include_reasoning,
        include_thoughts: include_reasoning && model.supports(THINKING),
    }
}

fn reasoning_for(response: &ImageCallResponse, include_reasoning: bool) -> String {
    if include_reasoning {
        response.reasoning_trace()
    } else {
        String::new()
    }
}
