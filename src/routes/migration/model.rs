// 旧数据迁移
//
// 旧平台把出席名单作为 ID 数组内嵌在场所/活动记录上，这里把它们
// 逐对补录进签到台账。幂等性完全依赖逐对的存在性检查，不设"已运行"
// 标记，所以中断后重跑、多次重跑都是安全的。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tokio::sync::watch;

use crate::error::AppError;
use crate::routes::checkin::model::CheckInRecord;
use crate::routes::history::model::UserHistory;

/// 迁移运行摘要，干跑和实跑返回同样的口径
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    /// 检查过的 (条目, 参与者) 对数
    pub processed: u64,
    /// 新补录的台账记录数
    pub created: u64,
    /// 台账里已存在、跳过的对数
    pub skipped: u64,
    /// 解析失败或写入失败的对数
    pub errored: u64,
    pub dry_run: bool,
}

#[derive(Debug, FromRow)]
struct LegacyItemRow {
    item_id: String,
    kind: String,
    created_at: DateTime<Utc>,
    legacy_participant_ids: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub struct PlannedRecord {
    pub user_id: String,
    pub legacy_ref: String,
}

/// 单个条目的迁移计划，纯计算，不碰存储
#[derive(Debug, Default)]
pub struct ItemPlan {
    pub to_create: Vec<PlannedRecord>,
    pub skipped: u64,
    pub unresolved: Vec<String>,
}

/// 对一个条目的旧参与者数组做解析和去重
///
/// - 解析不到稳定用户ID的参与者进 unresolved，由调用方记日志后跳过；
/// - 台账里已有该 (user, item) 对（无论 live 还是补录）→ skipped；
/// - 数组内重复的参与者只补录一次。
pub fn plan_item_migration(
    participants: &[String],
    resolver: &HashMap<String, String>,
    existing_user_ids: &HashSet<String>,
) -> ItemPlan {
    let mut plan = ItemPlan::default();
    let mut planned: HashSet<String> = HashSet::new();

    for legacy_ref in participants {
        let legacy_ref = legacy_ref.trim();
        if legacy_ref.is_empty() {
            continue;
        }

        let Some(user_id) = resolver.get(legacy_ref) else {
            plan.unresolved.push(legacy_ref.to_string());
            continue;
        };

        if existing_user_ids.contains(user_id) || !planned.insert(user_id.clone()) {
            plan.skipped += 1;
            continue;
        }

        plan.to_create.push(PlannedRecord {
            user_id: user_id.clone(),
            legacy_ref: legacy_ref.to_string(),
        });
    }

    plan
}

/// 执行迁移：按条目分块遍历，每对独立提交，单对失败不会中止整轮
pub async fn run_legacy_migration(
    pool: &PgPool,
    chunk_size: i64,
    dry_run: bool,
    shutdown: &watch::Receiver<bool>,
) -> Result<MigrationSummary, AppError> {
    let mut summary = MigrationSummary {
        dry_run,
        ..MigrationSummary::default()
    };

    // 旧平台ID到稳定用户ID的映射，一次装入
    let resolver = load_resolver(pool).await?;
    tracing::info!(
        "Legacy migration started: dry_run={} resolvable_users={}",
        dry_run,
        resolver.len()
    );

    // 按 item_id 做键集分页，分块处理，中断后可以安全续跑
    let mut cursor = String::new();
    loop {
        if *shutdown.borrow() {
            tracing::warn!("Legacy migration interrupted by shutdown, partial progress kept");
            break;
        }

        let items = sqlx::query_as::<_, LegacyItemRow>(
            r#"
            SELECT item_id, kind, created_at, legacy_participant_ids
            FROM items
            WHERE cardinality(legacy_participant_ids) > 0
              AND item_id > $1
            ORDER BY item_id
            LIMIT $2
            "#,
        )
        .bind(&cursor)
        .bind(chunk_size)
        .fetch_all(pool)
        .await?;

        let Some(last) = items.last() else {
            break;
        };
        cursor = last.item_id.clone();

        for item in &items {
            if *shutdown.borrow() {
                tracing::warn!("Legacy migration interrupted by shutdown, partial progress kept");
                return Ok(summary);
            }
            migrate_item(pool, item, &resolver, dry_run, &mut summary).await;
        }
    }

    tracing::info!(
        "Legacy migration finished: processed={} created={} skipped={} errored={} dry_run={}",
        summary.processed,
        summary.created,
        summary.skipped,
        summary.errored,
        summary.dry_run
    );

    Ok(summary)
}

async fn load_resolver(pool: &PgPool) -> Result<HashMap<String, String>, AppError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"SELECT legacy_id, user_id FROM users WHERE legacy_id IS NOT NULL"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

async fn migrate_item(
    pool: &PgPool,
    item: &LegacyItemRow,
    resolver: &HashMap<String, String>,
    dry_run: bool,
    summary: &mut MigrationSummary,
) {
    let pair_count = item
        .legacy_participant_ids
        .iter()
        .filter(|p| !p.trim().is_empty())
        .count() as u64;
    summary.processed += pair_count;

    // 该条目上已出现过的用户，存在性检查的依据
    let existing = match CheckInRecord::user_ids_for_item(pool, &item.item_id).await {
        Ok(user_ids) => user_ids.into_iter().collect::<HashSet<String>>(),
        Err(e) => {
            tracing::warn!("迁移时读取条目台账失败 item_id={}: {}", item.item_id, e);
            summary.errored += pair_count;
            return;
        }
    };

    let plan = plan_item_migration(&item.legacy_participant_ids, resolver, &existing);

    for legacy_ref in &plan.unresolved {
        tracing::warn!(
            "无法解析的旧参与者 item_id={} legacy_ref={}",
            item.item_id,
            legacy_ref
        );
    }
    summary.skipped += plan.skipped;
    summary.errored += plan.unresolved.len() as u64;

    if dry_run {
        // 干跑只统计，不提交任何写入
        summary.created += plan.to_create.len() as u64;
        return;
    }

    for record in &plan.to_create {
        match insert_pair(pool, item, record).await {
            Ok(()) => summary.created += 1,
            // 并发重跑时另一方已写入，按已存在处理
            Err(AppError::Conflict(_)) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(
                    "迁移补录失败 item_id={} user_id={}: {}",
                    item.item_id,
                    record.user_id,
                    e
                );
                summary.errored += 1;
            }
        }
    }
}

/// 补录一对：台账记录与历史索引在同一个事务里落盘
async fn insert_pair(
    pool: &PgPool,
    item: &LegacyItemRow,
    record: &PlannedRecord,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    CheckInRecord::insert_migrated(
        &mut *tx,
        &record.user_id,
        &item.item_id,
        item.created_at,
        &record.legacy_ref,
    )
    .await?;

    UserHistory::record(&mut *tx, &record.user_id, &item.item_id, &item.kind, item.created_at)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(l, u)| (l.to_string(), u.to_string()))
            .collect()
    }

    fn refs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plans_creation_for_new_pairs() {
        let resolver = resolver(&[("bubble-1", "u1"), ("bubble-2", "u2")]);
        let plan = plan_item_migration(&refs(&["bubble-1", "bubble-2"]), &resolver, &HashSet::new());

        assert_eq!(plan.to_create.len(), 2);
        assert_eq!(plan.skipped, 0);
        assert!(plan.unresolved.is_empty());
    }

    #[test]
    fn existing_pairs_are_skipped_not_duplicated() {
        let resolver = resolver(&[("bubble-1", "u1"), ("bubble-2", "u2")]);
        let existing: HashSet<String> = ["u1".to_string()].into_iter().collect();
        let plan = plan_item_migration(&refs(&["bubble-1", "bubble-2"]), &resolver, &existing);

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].user_id, "u2");
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn second_run_over_same_input_creates_nothing() {
        let resolver = resolver(&[("bubble-1", "u1"), ("bubble-2", "u2")]);
        let participants = refs(&["bubble-1", "bubble-2"]);

        let first = plan_item_migration(&participants, &resolver, &HashSet::new());
        // 第一轮写入后，这些用户都已出现在台账里
        let existing: HashSet<String> = first
            .to_create
            .iter()
            .map(|r| r.user_id.clone())
            .collect();

        let second = plan_item_migration(&participants, &resolver, &existing);
        assert!(second.to_create.is_empty());
        assert_eq!(second.skipped, 2);
    }

    #[test]
    fn unresolved_participants_are_reported_not_fatal() {
        let resolver = resolver(&[("bubble-1", "u1")]);
        let plan = plan_item_migration(
            &refs(&["bubble-1", "ghost-99"]),
            &resolver,
            &HashSet::new(),
        );

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.unresolved, vec!["ghost-99".to_string()]);
    }

    #[test]
    fn duplicate_participants_in_array_collapse_to_one() {
        let resolver = resolver(&[("bubble-1", "u1")]);
        let plan = plan_item_migration(
            &refs(&["bubble-1", "bubble-1", " bubble-1 "]),
            &resolver,
            &HashSet::new(),
        );

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.skipped, 2);
    }

    #[test]
    fn blank_entries_are_ignored() {
        let resolver = resolver(&[("bubble-1", "u1")]);
        let plan = plan_item_migration(&refs(&["", "  ", "bubble-1"]), &resolver, &HashSet::new());

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.skipped, 0);
        assert!(plan.unresolved.is_empty());
    }
}
