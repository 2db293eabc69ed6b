use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use checkin_backend::{
    AppState,
    config::Config,
    middleware::{RateLimiter, log_errors, rate_limit},
    routes, tasks,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'checkin_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client.clone());

    // 停机信号，后台任务在工作单元之间检查
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
        shutdown: shutdown_rx,
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // 启动热度定时重算任务
    let recompute_handle = tokio::spawn(tasks::schedule_recompute(state.clone()));

    // 业务路由
    let api_routes = Router::new()
        // 用户路由
        .route("/users/create", post(routes::user::create_user))
        .route("/users/by-id", get(routes::user::find_by_id))
        .route("/users/history", get(routes::history::get_user_history))
        // 签到路由
        .route("/check-ins/create", post(routes::checkin::create_check_in))
        .route("/check-ins/checkout", post(routes::checkin::check_out))
        .route("/check-ins/by-user", get(routes::checkin::find_user_check_ins))
        // 条目路由
        .route("/items/create", post(routes::item::create_item))
        .route("/items/by-id", get(routes::item::find_by_id))
        .route("/items/trending", get(routes::item::find_trending))
        .route("/items/nearby", get(routes::item::find_nearby));

    // 运维路由
    let admin_routes = Router::new()
        .route("/admin/migrate-legacy", post(routes::migration::run_legacy_migration))
        .route("/admin/recompute", post(routes::item::recompute_popularity));

    // 创建基础路由
    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(api_routes).merge(admin_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        // 设置开发环境的CORS，允许所有来源
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // 通知后台任务在工作单元边界停下
    let _ = shutdown_tx.send(true);
    let _ = recompute_handle.await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
