use crate::config::Config;
use crate::db::MongoDB;
use crate::live_hub::LiveHub;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub live_hub: Addr<LiveHub>,
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
    pub http_client: reqwest::Client,
}

/// State for handler tests. The driver connects lazily, so nothing here
/// touches a server until a handler issues a query.
#[cfg(test)]
pub async fn test_state() -> AppState {
    use actix::Actor;

    let config = crate::config::test_config();
    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .expect("test client");
    AppState {
        live_hub: LiveHub::new().start(),
        mongodb: Arc::new(mongodb),
        config,
        http_client: reqwest::Client::new(),
    }
}
