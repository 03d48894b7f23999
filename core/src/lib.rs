pub mod model;
pub mod queue;
pub mod reconcile;
pub mod status;

pub use model::{Model, ModelConfig, ModelError};
