use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::{
    AppState,
    tasks::{RecomputeSummary, run_recompute_pass},
    utils::{ApiResponse, app_error_to_api_response, error_codes, error_to_api_response,
        success_to_api_response},
};

use super::model::{CreateItemRequest, Item, NearbyItem, Timeframe, TrendingItem};

// 地理位置查询参数
#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    latitude: Option<f64>,
    longitude: Option<f64>,
    radius: Option<f64>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    city: Option<String>,
    timeframe: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    item_id: Option<String>,
}

#[axum::debug_handler]
pub async fn create_item(
    State(state): State<AppState>,
    Json(req): Json<CreateItemRequest>,
) -> Json<ApiResponse<Item>> {
    match Item::create(&state.pool, req).await {
        Ok(item) => success_to_api_response(item),
        Err(err) => {
            tracing::error!("创建条目错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}

#[axum::debug_handler]
pub async fn find_by_id(
    State(state): State<AppState>,
    Query(query): Query<ItemQuery>,
) -> Json<ApiResponse<Item>> {
    let item_id = match query.item_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "缺少item_id参数".to_string(),
            );
        }
    };

    match Item::find_by_id(&state.pool, &state.redis, &item_id).await {
        Ok(Some(item)) => success_to_api_response(item),
        Ok(None) => error_to_api_response(error_codes::NOT_FOUND, "条目不存在".to_string()),
        Err(err) => {
            tracing::error!("查询条目错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}

// 获取附近条目API
#[axum::debug_handler]
pub async fn find_nearby(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Json<ApiResponse<Vec<NearbyItem>>> {
    // 检查必需的位置参数
    let latitude = match query.latitude {
        Some(lat) => lat,
        None => {
            return error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "缺少latitude参数".to_string(),
            );
        }
    };

    let longitude = match query.longitude {
        Some(lng) => lng,
        None => {
            return error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "缺少longitude参数".to_string(),
            );
        }
    };

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return error_to_api_response(
            error_codes::VALIDATION_ERROR,
            "坐标超出有效范围".to_string(),
        );
    }

    // 半径默认1公里，且不超过配置上限
    let radius = query
        .radius
        .unwrap_or(1000.0)
        .min(state.config.max_search_radius);
    let limit = query.limit.unwrap_or(20).clamp(1, 50); // 最多返回50条记录

    match Item::find_nearby(
        &state.pool,
        &state.redis,
        latitude,
        longitude,
        radius,
        limit,
        state.config.nearby_candidate_limit,
    )
    .await
    {
        Ok(items) => success_to_api_response(items),
        Err(err) => {
            tracing::error!("查找附近条目错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}

// 获取热门条目API
#[axum::debug_handler]
pub async fn find_trending(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> Json<ApiResponse<Vec<TrendingItem>>> {
    let timeframe = match Timeframe::parse(query.timeframe.as_deref()) {
        Ok(tf) => tf,
        Err(err) => return app_error_to_api_response(&err),
    };
    let limit = query.limit.unwrap_or(20).clamp(1, 50);
    let city = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    match Item::find_trending(&state.pool, &state.redis, city, timeframe, limit).await {
        Ok(items) => success_to_api_response(items),
        Err(err) => {
            tracing::error!("查询热门条目错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}

// 手动触发一次热度重算（与定时任务同一条路径）
#[axum::debug_handler]
pub async fn recompute_popularity(
    State(state): State<AppState>,
) -> Json<ApiResponse<RecomputeSummary>> {
    match run_recompute_pass(&state).await {
        Ok(summary) => {
            tracing::info!(
                "Manual popularity recompute finished: recomputed={} zeroed={} failed={}",
                summary.recomputed,
                summary.zeroed,
                summary.failed
            );
            success_to_api_response(summary)
        }
        Err(err) => {
            tracing::error!("热度重算错误: {}", err);
            app_error_to_api_response(&err)
        }
    }
}
