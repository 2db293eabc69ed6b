use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{
    config::Config,
    utils::{error_codes, error_to_api_response},
};

const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

impl RateLimiter {
    pub fn new(redis: redis::Client, config: Config) -> Self {
        Self {
            redis: Arc::new(redis),
            config: Arc::new(config),
        }
    }

    pub async fn check_rate_limit(
        self: Arc<Self>,
        req: Request<Body>,
        next: Next,
    ) -> Result<Response, StatusCode> {
        // 从连接信息获取原始IP
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        // 优先使用代理头中的IP，降级使用连接IP
        let ip = req
            .headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .or_else(|| remote_ip.as_deref())
            .unwrap_or("unknown")
            .trim()
            .to_string();

        let key = format!("{}{}", RATE_LIMIT_KEY_PREFIX, ip);
        let mut conn = match self.redis.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                // 限流层故障不阻断请求
                tracing::warn!("Rate limiter redis unavailable: {}", e);
                return Ok(next.run(req).await);
            }
        };

        // 使用 Redis 的 INCR 和 EXPIRE 命令实现固定窗口计数器
        let count: i64 = match conn.incr(&key, 1).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Rate limiter INCR failed: {}", e);
                return Ok(next.run(req).await);
            }
        };

        if count == 1 {
            // 窗口内第一次请求，设置过期时间
            let _: Result<(), redis::RedisError> = conn
                .expire(&key, self.config.rate_limit_window().as_secs() as i64)
                .await;
        }

        if count > self.config.rate_limit_requests as i64 {
            return Ok((
                StatusCode::OK,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    format!(
                        "请求过于频繁，请在{}秒后重试",
                        self.config.rate_limit_window().as_secs()
                    ),
                ),
            )
                .into_response());
        }

        Ok(next.run(req).await)
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    limiter.check_rate_limit(req, next).await
}
