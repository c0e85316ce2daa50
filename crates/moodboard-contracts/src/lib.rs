pub mod bbox;
pub mod chat;
pub mod error;
pub mod events;
pub mod grid;
pub mod grounding;
pub mod models;
pub mod templates;

pub use error::{MoodboardError, Result};
