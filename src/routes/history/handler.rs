use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::{
    AppState,
    utils::{ApiResponse, app_error_to_api_response, error_codes, error_to_api_response,
        success_to_api_response},
};

use super::model::{UserHistory, UserHistoryView};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    user_id: Option<String>,
}

// 获取用户历史API
#[axum::debug_handler]
pub async fn get_user_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<ApiResponse<UserHistoryView>> {
    let user_id = match query.user_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "缺少user_id参数".to_string(),
            );
        }
    };

    match UserHistory::for_user(&state.pool, &user_id).await {
        Ok(view) => success_to_api_response(view),
        Err(err) => {
            tracing::error!("查询用户历史错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}
