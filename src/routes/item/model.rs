use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::utils::{calculate_distance, meters_to_miles};

// 缓存相关常量
const ITEM_ID_CACHE_PREFIX: &str = "item:id:"; // 条目ID缓存前缀
const ITEM_LOCATION_CACHE_PREFIX: &str = "item:loc:"; // 附近查询缓存前缀
const TRENDING_CACHE_PREFIX: &str = "trending:"; // 热门榜单缓存前缀
const ITEM_CACHE_EXPIRE: u64 = 600; // 条目缓存过期时间，单位秒
const QUERY_CACHE_EXPIRE: u64 = 120; // 查询结果缓存过期时间，单位秒
const TRENDING_CACHE_EXPIRE: u64 = 60; // 榜单缓存过期时间，单位秒

pub const KIND_VENUE: &str = "venue";
pub const KIND_EVENT: &str = "event";

/// 场所或活动，同一个 ID 空间，用 kind 区分
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub item_id: String,
    pub kind: String,
    pub name: String,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub recent_count: i64,
    pub weekly_count: i64,
    pub total_count: i64,
    pub score: f64,
    pub score_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub kind: String,
    pub name: String,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// 热门榜单的排序时间档
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timeframe {
    Recent,
    Week,
    All,
}

impl Timeframe {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(str::trim) {
            None | Some("") | Some("recent") => Ok(Timeframe::Recent),
            Some("week") => Ok(Timeframe::Week),
            Some("all") => Ok(Timeframe::All),
            Some(other) => Err(AppError::InvalidArgument(format!(
                "无效的timeframe参数: {}（可选 recent/week/all）",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Recent => "recent",
            Timeframe::Week => "week",
            Timeframe::All => "all",
        }
    }
}

/// 附近查询的候选行，坐标在 SQL 层已过滤非空
#[derive(Debug, FromRow)]
pub struct NearbyCandidate {
    pub item_id: String,
    pub kind: String,
    pub name: String,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NearbyItem {
    pub item_id: String,
    pub kind: String,
    pub name: String,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub score: f64,
    /// 距离（米）
    pub distance_m: f64,
    /// 距离（英里），方便调用方直接展示
    pub distance_miles: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrendingItem {
    pub item_id: String,
    pub kind: String,
    pub name: String,
    pub city: Option<String>,
    pub recent_count: i64,
    pub weekly_count: i64,
    pub total_count: i64,
    pub score: f64,
}

/// 半径过滤 + 距离升序排序（同距离按热度降序），截断到 limit
///
/// 候选池本身有上限，超出候选池的条目不参与排序，这是接受的扩展性约束。
pub fn rank_nearby(
    candidates: Vec<NearbyCandidate>,
    latitude: f64,
    longitude: f64,
    radius: f64,
    limit: usize,
) -> Vec<NearbyItem> {
    let mut nearby: Vec<NearbyItem> = candidates
        .into_iter()
        .filter_map(|c| {
            let distance = calculate_distance(latitude, longitude, c.latitude, c.longitude);
            if distance <= radius {
                Some(NearbyItem {
                    item_id: c.item_id,
                    kind: c.kind,
                    name: c.name,
                    city: c.city,
                    latitude: c.latitude,
                    longitude: c.longitude,
                    score: c.score,
                    distance_m: distance,
                    distance_miles: meters_to_miles(distance),
                })
            } else {
                None
            }
        })
        .collect();

    // 按距离排序，距离相同按热度排
    nearby.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(Ordering::Equal)
            .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
    nearby.truncate(limit);
    nearby
}

impl Item {
    pub async fn create(pool: &PgPool, req: CreateItemRequest) -> Result<Self, AppError> {
        if req.kind != KIND_VENUE && req.kind != KIND_EVENT {
            return Err(AppError::InvalidArgument(format!(
                "无效的kind参数: {}（可选 venue/event）",
                req.kind
            )));
        }
        if req.name.trim().is_empty() {
            return Err(AppError::InvalidArgument("名称不能为空".to_string()));
        }
        // 坐标必须成对出现
        if req.latitude.is_some() != req.longitude.is_some() {
            return Err(AppError::InvalidArgument(
                "latitude和longitude必须同时提供".to_string(),
            ));
        }

        let item_id = Uuid::new_v4().to_string();
        let item = sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items (item_id, kind, name, city, latitude, longitude, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING
                item_id, kind, name, city, latitude, longitude,
                recent_count, weekly_count, total_count, score, score_updated_at, created_at
            "#,
        )
        .bind(&item_id)
        .bind(&req.kind)
        .bind(req.name.trim())
        .bind(&req.city)
        .bind(req.latitude)
        .bind(req.longitude)
        .fetch_one(pool)
        .await?;

        Ok(item)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        item_id: &str,
    ) -> Result<Option<Self>, AppError> {
        // 尝试从缓存读取
        let cache_key = format!("{}{}", ITEM_ID_CACHE_PREFIX, item_id);

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
            if let Ok(json_str) = cached {
                if let Ok(item) = serde_json::from_str::<Item>(&json_str) {
                    tracing::debug!("Get item from cache: {}", cache_key);
                    return Ok(Some(item));
                }
            }
        }

        let item = sqlx::query_as::<_, Item>(
            r#"
            SELECT
                item_id, kind, name, city, latitude, longitude,
                recent_count, weekly_count, total_count, score, score_updated_at, created_at
            FROM items
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(pool)
        .await?;

        // 缓存结果
        if let Some(ref i) = item {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                if let Ok(json_str) = serde_json::to_string(i) {
                    let _: Result<(), redis::RedisError> =
                        conn.set_ex(&cache_key, json_str, ITEM_CACHE_EXPIRE).await;
                }
            }
        }

        Ok(item)
    }

    /// 查询条目的 kind，不存在返回 NotFound
    pub async fn kind_of(pool: &PgPool, item_id: &str) -> Result<String, AppError> {
        let kind = sqlx::query_scalar::<_, String>(r#"SELECT kind FROM items WHERE item_id = $1"#)
            .bind(item_id)
            .fetch_optional(pool)
            .await?;

        kind.ok_or_else(|| AppError::NotFound("条目不存在".to_string()))
    }

    pub async fn find_nearby(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        latitude: f64,
        longitude: f64,
        radius: f64,
        limit: i64,
        candidate_limit: i64,
    ) -> Result<Vec<NearbyItem>, AppError> {
        // 对于位置查询，将坐标精确到小数点后两位作为缓存key
        let lat_rounded = (latitude * 100.0).round() / 100.0;
        let lon_rounded = (longitude * 100.0).round() / 100.0;
        let cache_key = format!(
            "{}{}:{}:{}:{}",
            ITEM_LOCATION_CACHE_PREFIX, lat_rounded, lon_rounded, radius, limit
        );

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
            if let Ok(json_str) = cached {
                if let Ok(items) = serde_json::from_str::<Vec<NearbyItem>>(&json_str) {
                    tracing::debug!("Get nearby items from cache: {}", cache_key);
                    return Ok(items);
                }
            }
        }

        // 使用近似计算方法，先用经纬度范围过滤，再精确计算距离
        let lat_range = radius / 111_000.0; // 1度纬度约111km
        let lon_range = radius / (111_000.0 * latitude.to_radians().cos());

        let candidates = sqlx::query_as::<_, NearbyCandidate>(
            r#"
            SELECT item_id, kind, name, city, latitude, longitude, score
            FROM items
            WHERE latitude IS NOT NULL
              AND longitude IS NOT NULL
              AND latitude BETWEEN ($1 - $3) AND ($1 + $3)
              AND longitude BETWEEN ($2 - $4) AND ($2 + $4)
            LIMIT $5
            "#,
        )
        .bind(latitude)
        .bind(longitude)
        .bind(lat_range)
        .bind(lon_range)
        .bind(candidate_limit)
        .fetch_all(pool)
        .await?;

        let nearby = rank_nearby(candidates, latitude, longitude, radius, limit as usize);

        // 缓存结果，时间较短，因为位置查询结果变化较快
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            if let Ok(json_str) = serde_json::to_string(&nearby) {
                let _: Result<(), redis::RedisError> =
                    conn.set_ex(&cache_key, json_str, QUERY_CACHE_EXPIRE).await;
                tracing::debug!("Set nearby items to cache: {}", cache_key);
            }
        }

        Ok(nearby)
    }

    pub async fn find_trending(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        city: Option<&str>,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Vec<TrendingItem>, AppError> {
        let cache_key = format!(
            "{}{}:{}:{}",
            TRENDING_CACHE_PREFIX,
            city.unwrap_or("all"),
            timeframe.as_str(),
            limit
        );

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
            if let Ok(json_str) = cached {
                if let Ok(items) = serde_json::from_str::<Vec<TrendingItem>>(&json_str) {
                    tracing::debug!("Get trending items from cache: {}", cache_key);
                    return Ok(items);
                }
            }
        }

        // 时间档决定排序用的计数器，同值按综合热度排
        let query = match timeframe {
            Timeframe::Recent => {
                r#"
                SELECT item_id, kind, name, city,
                       recent_count, weekly_count, total_count, score
                FROM items
                WHERE ($1::text IS NULL OR city = $1)
                ORDER BY recent_count DESC, score DESC
                LIMIT $2
                "#
            }
            Timeframe::Week => {
                r#"
                SELECT item_id, kind, name, city,
                       recent_count, weekly_count, total_count, score
                FROM items
                WHERE ($1::text IS NULL OR city = $1)
                ORDER BY weekly_count DESC, score DESC
                LIMIT $2
                "#
            }
            Timeframe::All => {
                r#"
                SELECT item_id, kind, name, city,
                       recent_count, weekly_count, total_count, score
                FROM items
                WHERE ($1::text IS NULL OR city = $1)
                ORDER BY total_count DESC, score DESC
                LIMIT $2
                "#
            }
        };

        let rows = sqlx::query_as::<_, TrendingRow>(query)
            .bind(city)
            .bind(limit)
            .fetch_all(pool)
            .await?;

        let items: Vec<TrendingItem> = rows
            .into_iter()
            .map(|r| TrendingItem {
                item_id: r.item_id,
                kind: r.kind,
                name: r.name,
                city: r.city,
                recent_count: r.recent_count,
                weekly_count: r.weekly_count,
                total_count: r.total_count,
                score: r.score,
            })
            .collect();

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            if let Ok(json_str) = serde_json::to_string(&items) {
                let _: Result<(), redis::RedisError> = conn
                    .set_ex(&cache_key, json_str, TRENDING_CACHE_EXPIRE)
                    .await;
                tracing::debug!("Set trending items to cache: {}", cache_key);
            }
        }

        Ok(items)
    }
}

/// 签到写入后清除榜单缓存，失败只记日志
pub async fn purge_trending_cache(redis: &Arc<RedisClient>) {
    let pattern = format!("{}*", TRENDING_CACHE_PREFIX);

    if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();

        for key in keys {
            let _: Result<(), redis::RedisError> = conn.del(&key).await;
        }
    }
}

// 定义原始数据结构，用于从数据库查询
#[derive(FromRow)]
struct TrendingRow {
    item_id: String,
    kind: String,
    name: String,
    city: Option<String>,
    recent_count: i64,
    weekly_count: i64,
    total_count: i64,
    score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, lat: f64, lon: f64, score: f64) -> NearbyCandidate {
        NearbyCandidate {
            item_id: id.to_string(),
            kind: KIND_VENUE.to_string(),
            name: id.to_string(),
            city: Some("Austin".to_string()),
            latitude: lat,
            longitude: lon,
            score,
        }
    }

    // 奥斯汀市中心附近的参考点
    const ORIGIN_LAT: f64 = 30.267;
    const ORIGIN_LON: f64 = -97.743;

    #[test]
    fn excludes_items_outside_radius_regardless_of_score() {
        // 约1.7公里外的高分条目和500米内的低分条目
        let candidates = vec![
            candidate("far-popular", 30.2823, -97.743, 999.0),
            candidate("near-quiet", 30.2695, -97.743, 1.0),
        ];
        let ranked = rank_nearby(candidates, ORIGIN_LAT, ORIGIN_LON, 1000.0, 20);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item_id, "near-quiet");
        assert!(ranked[0].distance_m <= 1000.0);
    }

    #[test]
    fn sorts_by_distance_ascending() {
        let candidates = vec![
            candidate("c", 30.275, -97.743, 0.0),
            candidate("a", 30.268, -97.743, 0.0),
            candidate("b", 30.271, -97.743, 0.0),
        ];
        let ranked = rank_nearby(candidates, ORIGIN_LAT, ORIGIN_LON, 2000.0, 20);

        let ids: Vec<&str> = ranked.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(ranked.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
    }

    #[test]
    fn equal_distance_breaks_tie_by_score() {
        // 同一坐标，距离相同
        let candidates = vec![
            candidate("quiet", 30.270, -97.743, 2.0),
            candidate("popular", 30.270, -97.743, 50.0),
        ];
        let ranked = rank_nearby(candidates, ORIGIN_LAT, ORIGIN_LON, 2000.0, 20);

        assert_eq!(ranked[0].item_id, "popular");
        assert_eq!(ranked[1].item_id, "quiet");
    }

    #[test]
    fn truncates_to_limit() {
        let candidates = (0..10)
            .map(|i| candidate(&format!("i{}", i), 30.268 + i as f64 * 0.0001, -97.743, 0.0))
            .collect();
        let ranked = rank_nearby(candidates, ORIGIN_LAT, ORIGIN_LON, 5000.0, 3);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn reports_distance_in_meters_and_miles() {
        let candidates = vec![candidate("x", 30.2695, -97.743, 0.0)];
        let ranked = rank_nearby(candidates, ORIGIN_LAT, ORIGIN_LON, 1000.0, 20);

        let item = &ranked[0];
        assert!((item.distance_miles - item.distance_m * 0.000621371).abs() < 1e-9);
    }

    #[test]
    fn timeframe_parses_known_values() {
        assert_eq!(Timeframe::parse(None).expect("default"), Timeframe::Recent);
        assert_eq!(
            Timeframe::parse(Some("recent")).expect("recent"),
            Timeframe::Recent
        );
        assert_eq!(Timeframe::parse(Some("week")).expect("week"), Timeframe::Week);
        assert_eq!(Timeframe::parse(Some("all")).expect("all"), Timeframe::All);
    }

    #[test]
    fn timeframe_rejects_unknown_value() {
        let err = Timeframe::parse(Some("fortnight")).expect_err("reject");
        assert_eq!(err.kind(), "invalid_argument");
    }
}
