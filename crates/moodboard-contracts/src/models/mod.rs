mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_ASPECT_RATIO, THINKING};
pub use selectors::{ModelSelection, ModelSelector};
