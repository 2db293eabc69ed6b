use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    utils::{ApiResponse, app_error_to_api_response, error_codes, error_to_api_response,
        success_to_api_response},
};

use super::model::CheckInRecord;

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    user_id: String,
    item_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    checkin_id: String,
    checked_in_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CheckOutResponse {
    checked_out_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UserCheckInsQuery {
    user_id: Option<String>,
    limit: Option<i64>,
}

fn validate_ids(user_id: &str, item_id: &str) -> Option<String> {
    if user_id.trim().is_empty() {
        return Some("缺少user_id参数".to_string());
    }
    if item_id.trim().is_empty() {
        return Some("缺少item_id参数".to_string());
    }
    None
}

// 签到API
#[axum::debug_handler]
pub async fn create_check_in(
    State(state): State<AppState>,
    Json(req): Json<CheckInRequest>,
) -> Json<ApiResponse<CheckInResponse>> {
    if let Some(msg) = validate_ids(&req.user_id, &req.item_id) {
        return error_to_api_response(error_codes::VALIDATION_ERROR, msg);
    }

    match CheckInRecord::create(
        &state.pool,
        &state.redis,
        req.user_id.trim(),
        req.item_id.trim(),
        Utc::now(),
    )
    .await
    {
        Ok(record) => success_to_api_response(CheckInResponse {
            checkin_id: record.checkin_id,
            checked_in_at: record.checked_in_at,
        }),
        Err(err) => {
            tracing::error!(
                "签到错误 user_id={} item_id={}: {}",
                req.user_id,
                req.item_id,
                err
            );
            app_error_to_api_response(&err)
        }
    }
}

// 签退API
#[axum::debug_handler]
pub async fn check_out(
    State(state): State<AppState>,
    Json(req): Json<CheckInRequest>,
) -> Json<ApiResponse<CheckOutResponse>> {
    if let Some(msg) = validate_ids(&req.user_id, &req.item_id) {
        return error_to_api_response(error_codes::VALIDATION_ERROR, msg);
    }

    match CheckInRecord::check_out(
        &state.pool,
        &state.redis,
        req.user_id.trim(),
        req.item_id.trim(),
        Utc::now(),
    )
    .await
    {
        Ok(checked_out_at) => success_to_api_response(CheckOutResponse { checked_out_at }),
        Err(err) => {
            tracing::error!(
                "签退错误 user_id={} item_id={}: {}",
                req.user_id,
                req.item_id,
                err
            );
            app_error_to_api_response(&err)
        }
    }
}

// 获取用户签到记录API
#[axum::debug_handler]
pub async fn find_user_check_ins(
    State(state): State<AppState>,
    Query(query): Query<UserCheckInsQuery>,
) -> Json<ApiResponse<Vec<CheckInRecord>>> {
    let user_id = match query.user_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "缺少user_id参数".to_string(),
            );
        }
    };
    let limit = query.limit.unwrap_or(20).clamp(1, 50); // 最多返回50条记录

    match CheckInRecord::for_user(&state.pool, &user_id, limit).await {
        Ok(records) => success_to_api_response(records),
        Err(err) => {
            tracing::error!("查询用户签到记录错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}
