use std::sync::Arc;

use super::{
    config::Config,
    connection::ConnectionManager,
    error::AppError,
    repository::{Connector, TodoRepository},
};

pub struct AppState {
    pub config: Config,
    pub connection: Arc<ConnectionManager>,
}

impl AppState {
    /// Builds the state without connecting. Call [`ConnectionManager::start`] to begin.
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Arc<Self> {
        let connection = ConnectionManager::new(connector, config.retry.clone())
            .with_heartbeat(config.heartbeat)
            .with_target(config.database.masked_uri())
            .verbose(!config.environment.is_production());

        Arc::new(Self {
            config,
            connection: Arc::new(connection),
        })
    }

    /// Waits for the database, then hands out a repository over the live store.
    pub async fn repository(&self) -> Result<TodoRepository, AppError> {
        let store = self
            .connection
            .wait_until_connected(self.config.gate_timeout)
            .await?;

        Ok(TodoRepository::new(store))
    }
}
