use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::DbPool;
use crate::workers::recorder::status::StatusBoard;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub status: StatusBoard,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, status: StatusBoard) -> Self {
        Self { config, db, status }
    }
}
