pub mod cache;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod model;
pub mod relevance;
pub mod retrieval;
pub mod scoring;
pub mod segment;
pub mod stats;
pub mod store;
pub mod weights;
pub mod workflow;

pub use config::Config;
pub use error::{EvalError, Result};
pub use store::Store;
