use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::{
    AppState,
    utils::{ApiResponse, app_error_to_api_response, success_to_api_response},
};

use super::model::{self, MigrationSummary};

#[derive(Debug, Deserialize)]
pub struct MigrationQuery {
    dry_run: Option<bool>,
}

// 触发旧数据迁移API，幂等，可带 dry_run=true 先预览
#[axum::debug_handler]
pub async fn run_legacy_migration(
    State(state): State<AppState>,
    Query(query): Query<MigrationQuery>,
) -> Json<ApiResponse<MigrationSummary>> {
    let dry_run = query.dry_run.unwrap_or(false);

    match model::run_legacy_migration(
        &state.pool,
        state.config.migration_chunk_size,
        dry_run,
        &state.shutdown,
    )
    .await
    {
        Ok(summary) => success_to_api_response(summary),
        Err(err) => {
            tracing::error!("旧数据迁移错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}
