use config::Config;
use redis::Client as RedisClient;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;

pub mod config;
pub mod error;
pub mod middleware;
pub mod popularity;
pub mod utils;

pub mod routes;
pub mod tasks;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    /// 停机信号，后台任务在工作单元之间检查
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
