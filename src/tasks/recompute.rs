// 热度全量重算任务
//
// 定时从签到台账重建每个条目的聚合并无条件覆盖，增量路径在两轮
// 之间累积的偏差在这里被修正。单循环逐轮执行，轮与轮天然串行；
// 重算是台账的纯函数且覆盖幂等，与增量写并发时以本轮覆盖为准。

use chrono::Utc;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;

use crate::AppState;
use crate::error::AppError;
use crate::popularity::{self, PopularityAggregate, PopularityWrite};
use crate::routes::checkin::model::CheckInRecord;

/// 单轮重算的摘要
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RecomputeSummary {
    /// 重算后仍有活动的条目数
    pub recomputed: u64,
    /// 三个窗口都没有活动、被写回全零的条目数
    pub zeroed: u64,
    /// 失败跳过的条目数
    pub failed: u64,
}

/// 台账上出现过、或当前聚合非零的条目都要重算；
/// 后者保证冷掉的条目被明确清零而不是停在旧分数上。
const AFFECTED_ITEMS_SQL: &str = r#"
    SELECT item_id FROM items
    WHERE recent_count > 0 OR weekly_count > 0 OR total_count > 0 OR score > 0
    UNION
    SELECT DISTINCT item_id FROM check_ins
"#;

/// 按固定间隔跑重算，直到收到停机信号
pub async fn schedule_recompute(state: AppState) {
    let mut interval = tokio::time::interval(state.config.recompute_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shutdown = state.shutdown.clone();

    tracing::info!(
        "Popularity recompute scheduled every {}s",
        state.config.recompute_interval_secs
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_recompute_pass(&state).await {
                    Ok(summary) => tracing::info!(
                        "Popularity recompute pass finished: recomputed={} zeroed={} failed={}",
                        summary.recomputed,
                        summary.zeroed,
                        summary.failed
                    ),
                    Err(e) => tracing::error!("Popularity recompute pass failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                // 发送端关闭或收到停机信号都退出
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Popularity recompute task stopped");
}

/// 跑一轮全量重算，单个条目失败记日志后跳过，整轮继续
pub async fn run_recompute_pass(state: &AppState) -> Result<RecomputeSummary, AppError> {
    let now = Utc::now();
    let mut summary = RecomputeSummary::default();

    let mut item_ids = sqlx::query_scalar::<_, String>(AFFECTED_ITEMS_SQL).fetch(&state.pool);

    while let Some(item_id) = item_ids.try_next().await? {
        // 停机时在条目边界停下，已写入的条目保持有效
        if state.is_shutting_down() {
            tracing::warn!("Recompute pass interrupted by shutdown, partial progress kept");
            break;
        }

        match recompute_item(&state.pool, &item_id, now).await {
            Ok(agg) if agg.is_zero() => summary.zeroed += 1,
            Ok(_) => summary.recomputed += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!("重算条目热度失败 item_id={}: {}", item_id, e);
            }
        }
    }

    Ok(summary)
}

async fn recompute_item(
    pool: &PgPool,
    item_id: &str,
    now: chrono::DateTime<Utc>,
) -> Result<PopularityAggregate, AppError> {
    let times = CheckInRecord::checkin_times_for_item(pool, item_id).await?;
    let agg = PopularityAggregate::from_checkins(&times, now);

    popularity::apply(pool, item_id, PopularityWrite::Overwrite(agg.clone())).await?;
    Ok(agg)
}
