pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

pub use config::Config;

use pipeline::BatchService;

#[derive(Clone)]
pub struct AppState {
    pub batches: Arc<BatchService>,
}
