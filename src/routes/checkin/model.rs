use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::Client as RedisClient;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::popularity::{self, PopularityWrite};
use crate::routes::history::model::UserHistory;
use crate::routes::item::model::{self as item_model, Item};

pub const PROVENANCE_LIVE: &str = "live";
pub const PROVENANCE_MIGRATED: &str = "migrated-legacy";

/// 台账里的一条签到记录
///
/// 只追加：创建后唯一允许的变更是签退时翻转 is_active 并写入 checked_out_at，
/// 之后作为历史永久保留，从不删除。
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct CheckInRecord {
    pub checkin_id: String,
    pub user_id: String,
    pub item_id: String,
    pub checked_in_at: DateTime<Utc>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// live 或 migrated-legacy
    pub provenance: String,
    /// 迁移记录对应的旧平台参与者标识
    pub legacy_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CheckInRecord {
    /// 签到：同一 (user, item) 已有活跃记录时返回 Conflict
    pub async fn create(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        user_id: &str,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let user_exists = crate::routes::user::model::User::exists(pool, user_id).await?;
        if !user_exists {
            return Err(AppError::NotFound("用户不存在".to_string()));
        }

        // 条目必须存在，kind 用于历史索引
        let kind = Item::kind_of(pool, item_id).await?;

        // 检查是否已有活跃签到
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM check_ins
                WHERE user_id = $1 AND item_id = $2 AND is_active
            )
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_one(pool)
        .await?;

        if active {
            return Err(AppError::Conflict("已有未签退的签到".to_string()));
        }

        // 开启事务：台账追加与历史索引一起写入
        let mut tx = pool.begin().await?;

        let checkin_id = Uuid::new_v4().to_string();
        // 并发写入同一对 (user, item) 时由活跃记录的唯一索引兜底，
        // 唯一约束冲突同样映射为 Conflict
        let record = sqlx::query_as::<_, CheckInRecord>(
            r#"
            INSERT INTO check_ins
                (checkin_id, user_id, item_id, checked_in_at, is_active, provenance, created_at)
            VALUES
                ($1, $2, $3, $4, TRUE, $5, NOW())
            RETURNING
                checkin_id, user_id, item_id, checked_in_at, checked_out_at,
                is_active, provenance, legacy_ref, created_at
            "#,
        )
        .bind(&checkin_id)
        .bind(user_id)
        .bind(item_id)
        .bind(at)
        .bind(PROVENANCE_LIVE)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::Conflict("已有未签退的签到".to_string()),
            other => other,
        })?;

        UserHistory::record(&mut *tx, user_id, item_id, &kind, at).await?;

        tx.commit().await?;

        // 增量更新热度，失败不影响签到本身，下一轮全量重算会修正
        if let Err(e) = popularity::apply(pool, item_id, PopularityWrite::CheckInDelta).await {
            tracing::warn!("签到后更新热度失败 item_id={}: {}", item_id, e);
        }
        item_model::purge_trending_cache(redis).await;

        Ok(record)
    }

    /// 签退：没有活跃记录时返回 NotFound
    pub async fn check_out(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        user_id: &str,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AppError> {
        // 单条 UPDATE 命中唯一的活跃记录
        let checked_out_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            UPDATE check_ins
            SET is_active = FALSE, checked_out_at = $3
            WHERE user_id = $1 AND item_id = $2 AND is_active
            RETURNING checked_out_at
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(at)
        .fetch_optional(pool)
        .await?;

        let checked_out_at = checked_out_at
            .ok_or_else(|| AppError::NotFound("没有进行中的签到".to_string()))?;

        if let Err(e) = popularity::apply(pool, item_id, PopularityWrite::CheckOutDelta).await {
            tracing::warn!("签退后更新热度失败 item_id={}: {}", item_id, e);
        }
        item_model::purge_trending_cache(redis).await;

        Ok(checked_out_at)
    }

    /// 迁移补录：在调用方的事务里追加一条已签退的历史记录
    pub async fn insert_migrated(
        executor: impl sqlx::PgExecutor<'_>,
        user_id: &str,
        item_id: &str,
        checked_in_at: DateTime<Utc>,
        legacy_ref: &str,
    ) -> Result<String, sqlx::Error> {
        let checkin_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO check_ins
                (checkin_id, user_id, item_id, checked_in_at, is_active, provenance,
                 legacy_ref, created_at)
            VALUES
                ($1, $2, $3, $4, FALSE, $5, $6, NOW())
            "#,
        )
        .bind(&checkin_id)
        .bind(user_id)
        .bind(item_id)
        .bind(checked_in_at)
        .bind(PROVENANCE_MIGRATED)
        .bind(legacy_ref)
        .execute(executor)
        .await?;

        Ok(checkin_id)
    }

    /// 一个条目的全部签到时间，重算路径的输入（活跃与已签退都算）
    pub async fn checkin_times_for_item(
        pool: &PgPool,
        item_id: &str,
    ) -> Result<Vec<DateTime<Utc>>, AppError> {
        let times = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"SELECT checked_in_at FROM check_ins WHERE item_id = $1"#,
        )
        .bind(item_id)
        .fetch_all(pool)
        .await?;

        Ok(times)
    }

    /// 某个条目上已经出现过的用户集合，迁移时用于存在性检查
    pub async fn user_ids_for_item(pool: &PgPool, item_id: &str) -> Result<Vec<String>, AppError> {
        let user_ids = sqlx::query_scalar::<_, String>(
            r#"SELECT DISTINCT user_id FROM check_ins WHERE item_id = $1"#,
        )
        .bind(item_id)
        .fetch_all(pool)
        .await?;

        Ok(user_ids)
    }

    /// 按用户查签到记录，最新的在前
    pub async fn for_user(
        pool: &PgPool,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Self>, AppError> {
        let records = sqlx::query_as::<_, CheckInRecord>(
            r#"
            SELECT
                checkin_id, user_id, item_id, checked_in_at, checked_out_at,
                is_active, provenance, legacy_ref, created_at
            FROM check_ins
            WHERE user_id = $1
            ORDER BY checked_in_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(records)
    }
}
