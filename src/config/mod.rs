use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    /// 附近查询允许的最大半径（米）
    pub max_search_radius: f64,
    /// 热度全量重算的间隔（秒）
    pub recompute_interval_secs: u64,
    /// 附近查询的候选池上限，超出部分不参与精确距离计算
    pub nearby_candidate_limit: i64,
    /// 旧数据迁移每批处理的条目数
    pub migration_chunk_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".to_string()),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            max_search_radius: env::var("MAX_SEARCH_RADIUS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000.0),
            recompute_interval_secs: env::var("RECOMPUTE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),
            nearby_candidate_limit: env::var("NEARBY_CANDIDATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            migration_chunk_size: env::var("MIGRATION_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
        })
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn recompute_interval(&self) -> Duration {
        Duration::from_secs(self.recompute_interval_secs)
    }
}
