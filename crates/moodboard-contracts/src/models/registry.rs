use indexmap::IndexMap;

pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Capability of models that can return their thought summaries.
pub const THINKING: &str = "thinking";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    /// Output resolution tier sent as `imageSize`; only some models accept one.
    pub image_size: Option<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, image_size: Option<&str>, extra: &[&str]| {
        let capabilities = ["image", "edit"]
            .iter()
            .chain(extra)
            .map(|capability| capability.to_string())
            .collect();
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities,
                image_size: image_size.map(str::to_string),
            },
        );
    };

    insert("gemini-3-pro-image-preview", "gemini", Some("1K"), &[THINKING]);
    insert("gemini-2.5-flash-image", "gemini", None, &[]);
    insert("dryrun-image-1", "dryrun", None, &[]);

    map
}
