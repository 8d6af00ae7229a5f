pub mod cache;
mod codec;
mod connect;
mod handler;
mod headers;
mod http;
pub mod listener;
pub mod request;
mod respond;
pub mod upstream;

use std::sync::Arc;

use anyhow::Result;

use crate::settings::Settings;
use cache::ResponseCache;

/// Shared state handed to every connection handler: the settings and the
/// process-wide response cache.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<ResponseCache>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, cache: Arc<ResponseCache>) -> Self {
        Self { settings, cache }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
