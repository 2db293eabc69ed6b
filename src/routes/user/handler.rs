use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    utils::{ApiResponse, app_error_to_api_response, error_codes, error_to_api_response,
        success_to_api_response},
};

use super::model::{CreateUserRequest, User};

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: String,
    pub nickname: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    user_id: Option<String>,
}

#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Json<ApiResponse<CreateUserResponse>> {
    match User::create(&state.pool, req).await {
        Ok(user) => success_to_api_response(CreateUserResponse {
            user_id: user.user_id,
            nickname: user.nickname,
        }),
        Err(err) => {
            tracing::error!("创建用户错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}

#[axum::debug_handler]
pub async fn find_by_id(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Json<ApiResponse<User>> {
    let user_id = match query.user_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "缺少user_id参数".to_string(),
            );
        }
    };

    match User::find_by_id(&state.pool, &user_id).await {
        Ok(Some(user)) => success_to_api_response(user),
        Ok(None) => error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
        Err(err) => {
            tracing::error!("查询用户错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}
