pub mod api;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod payload;
pub mod project;
pub mod signature;
pub mod task;

use std::sync::Arc;

use config::ServiceConfig;
use handler::WebhookHandler;

pub struct AppState {
    pub config: ServiceConfig,
    pub handler: WebhookHandler,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        let handler = WebhookHandler::from_config(&config);
        Self { config, handler }
    }
}

pub type SharedState = Arc<AppState>;
