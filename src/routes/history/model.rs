use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::AppError;
use crate::routes::item::model::KIND_VENUE;

/// 用户历史：去过的场所和参加过的活动，按类别分成两个集合。
/// 只增不删，签退不会移除条目；"当前是否在场"由台账的活跃记录推导，与历史无关。
pub struct UserHistory;

/// 历史条目及其对应条目的概要信息
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryItemSummary {
    pub item_id: String,
    pub kind: String,
    pub name: String,
    pub city: Option<String>,
    pub score: f64,
    pub first_checked_in_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserHistoryView {
    pub user_id: String,
    /// 去过的场所ID集合
    pub venue_ids: Vec<String>,
    /// 参加过的活动ID集合
    pub event_ids: Vec<String>,
    pub items: Vec<HistoryItemSummary>,
}

#[derive(FromRow)]
struct HistoryRow {
    item_id: String,
    item_kind: String,
    first_checked_in_at: DateTime<Utc>,
    name: String,
    city: Option<String>,
    score: f64,
}

impl UserHistory {
    /// 记录一次出席，集合语义：同一 (user, item) 只保留首次
    ///
    /// 与台账写入放在同一个事务里执行，live 和迁移补录的签到走同一条路径。
    pub async fn record(
        executor: impl sqlx::PgExecutor<'_>,
        user_id: &str,
        item_id: &str,
        item_kind: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO user_history (user_id, item_id, item_kind, first_checked_in_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, item_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(item_kind)
        .bind(at)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn for_user(pool: &PgPool, user_id: &str) -> Result<UserHistoryView, AppError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT
                h.item_id, h.item_kind, h.first_checked_in_at,
                i.name, i.city, i.score
            FROM user_history h
            JOIN items i ON h.item_id = i.item_id
            WHERE h.user_id = $1
            ORDER BY h.first_checked_in_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut venue_ids = Vec::new();
        let mut event_ids = Vec::new();
        let mut items = Vec::with_capacity(rows.len());

        for row in rows {
            if row.item_kind == KIND_VENUE {
                venue_ids.push(row.item_id.clone());
            } else {
                event_ids.push(row.item_id.clone());
            }
            items.push(HistoryItemSummary {
                item_id: row.item_id,
                kind: row.item_kind,
                name: row.name,
                city: row.city,
                score: row.score,
                first_checked_in_at: row.first_checked_in_at,
            });
        }

        Ok(UserHistoryView {
            user_id: user_id.to_string(),
            venue_ids,
            event_ids,
            items,
        })
    }
}
