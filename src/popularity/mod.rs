// 热度聚合模块
//
// 同一个聚合有两条并发的更新路径：
// 1. 增量路径：每次签到/签退立即对 items 表做一条原子增减 SQL，
//    读取方马上能看到变化，但过了时间窗口的旧签到不会在这里过期；
// 2. 重算路径：定时任务从签到台账全量重建聚合并无条件覆盖。
//
// 约定：增量维护的聚合立即可读，但只在每个重算周期被修正一次；
// 两条路径都必须经过本模块的 PopularityWrite，不允许绕开。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppError;

/// 重算公式权重：score = 5*recent + 2*weekly + 0.5*total
pub const RECENT_WEIGHT: f64 = 5.0;
pub const WEEKLY_WEIGHT: f64 = 2.0;
pub const TOTAL_WEIGHT: f64 = 0.5;

/// 增量路径的固定加减分（签到+5，签退-2，与重算权重不对称，维持线上观察到的行为）
pub const CHECK_IN_SCORE_DELTA: f64 = 5.0;
pub const CHECK_OUT_SCORE_DELTA: f64 = 2.0;

/// 24小时窗口
pub const RECENT_WINDOW_HOURS: i64 = 24;
/// 7天窗口
pub const WEEKLY_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityAggregate {
    pub recent_count: i64,
    pub weekly_count: i64,
    pub total_count: i64,
    pub score: f64,
}

impl PopularityAggregate {
    pub fn zero() -> Self {
        Self {
            recent_count: 0,
            weekly_count: 0,
            total_count: 0,
            score: 0.0,
        }
    }

    pub fn compute_score(recent_count: i64, weekly_count: i64, total_count: i64) -> f64 {
        RECENT_WEIGHT * recent_count as f64
            + WEEKLY_WEIGHT * weekly_count as f64
            + TOTAL_WEIGHT * total_count as f64
    }

    /// 从台账里一个条目的全部签到时间重建聚合
    ///
    /// 计数只看 checked_in_at 是否落在窗口内，已签退的记录同样计入；
    /// recent/weekly 有时间下界（含），total 为全量。
    pub fn from_checkins(checked_in_ats: &[DateTime<Utc>], now: DateTime<Utc>) -> Self {
        let recent_floor = now - Duration::hours(RECENT_WINDOW_HOURS);
        let weekly_floor = now - Duration::days(WEEKLY_WINDOW_DAYS);

        let mut recent_count = 0i64;
        let mut weekly_count = 0i64;
        let total_count = checked_in_ats.len() as i64;

        for at in checked_in_ats {
            if *at >= recent_floor {
                recent_count += 1;
            }
            if *at >= weekly_floor {
                weekly_count += 1;
            }
        }

        let score = Self::compute_score(recent_count, weekly_count, total_count);
        Self {
            recent_count,
            weekly_count,
            total_count,
            score,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.recent_count == 0 && self.weekly_count == 0 && self.total_count == 0 && self.score == 0.0
    }
}

/// 聚合写入协议，两条更新路径的唯一入口
#[derive(Debug)]
pub enum PopularityWrite {
    /// 签到：recent+1、total+1、score+5，一条原子 SQL
    CheckInDelta,
    /// 签退：recent-1、score-2（都不低于0），total 不变
    CheckOutDelta,
    /// 重算结果无条件覆盖，与增量写并发时以覆盖为准
    Overwrite(PopularityAggregate),
}

pub async fn apply(pool: &PgPool, item_id: &str, write: PopularityWrite) -> Result<(), AppError> {
    match write {
        PopularityWrite::CheckInDelta => {
            sqlx::query(
                r#"
                UPDATE items
                SET recent_count = recent_count + 1,
                    total_count = total_count + 1,
                    score = score + $2,
                    score_updated_at = NOW()
                WHERE item_id = $1
                "#,
            )
            .bind(item_id)
            .bind(CHECK_IN_SCORE_DELTA)
            .execute(pool)
            .await?;
        }
        PopularityWrite::CheckOutDelta => {
            // total_count 是历史计数，签退永不回退
            sqlx::query(
                r#"
                UPDATE items
                SET recent_count = GREATEST(recent_count - 1, 0),
                    score = GREATEST(score - $2, 0),
                    score_updated_at = NOW()
                WHERE item_id = $1
                "#,
            )
            .bind(item_id)
            .bind(CHECK_OUT_SCORE_DELTA)
            .execute(pool)
            .await?;
        }
        PopularityWrite::Overwrite(agg) => {
            sqlx::query(
                r#"
                UPDATE items
                SET recent_count = $2,
                    weekly_count = $3,
                    total_count = $4,
                    score = $5,
                    score_updated_at = NOW()
                WHERE item_id = $1
                "#,
            )
            .bind(item_id)
            .bind(agg.recent_count)
            .bind(agg.weekly_count)
            .bind(agg.total_count)
            .bind(agg.score)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(base: DateTime<Utc>, minutes_ago: i64) -> DateTime<Utc> {
        base - Duration::minutes(minutes_ago)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
    }

    #[test]
    fn score_formula_holds_after_rebuild() {
        let now = now();
        // 两次签到都在30分钟内，其中一人已签退也照样计入
        let agg = PopularityAggregate::from_checkins(&[at(now, 30), at(now, 29)], now);
        assert_eq!(agg.recent_count, 2);
        assert_eq!(agg.weekly_count, 2);
        assert_eq!(agg.total_count, 2);
        assert_eq!(agg.score, 15.0);
        assert_eq!(
            agg.score,
            PopularityAggregate::compute_score(agg.recent_count, agg.weekly_count, agg.total_count)
        );
    }

    #[test]
    fn checkin_older_than_a_day_leaves_recent_window() {
        let now = now();
        // 25小时前的唯一一次签到：出了24小时窗口，仍在7天窗口
        let agg = PopularityAggregate::from_checkins(&[at(now, 25 * 60)], now);
        assert_eq!(agg.recent_count, 0);
        assert_eq!(agg.weekly_count, 1);
        assert_eq!(agg.total_count, 1);
        assert_eq!(agg.score, 2.5);
    }

    #[test]
    fn checkin_older_than_a_week_only_counts_toward_total() {
        let now = now();
        let agg = PopularityAggregate::from_checkins(&[at(now, 8 * 24 * 60)], now);
        assert_eq!(agg.recent_count, 0);
        assert_eq!(agg.weekly_count, 0);
        assert_eq!(agg.total_count, 1);
        assert_eq!(agg.score, 0.5);
    }

    #[test]
    fn window_lower_bound_is_inclusive() {
        let now = now();
        let exactly_24h = now - Duration::hours(RECENT_WINDOW_HOURS);
        let agg = PopularityAggregate::from_checkins(&[exactly_24h], now);
        assert_eq!(agg.recent_count, 1);
    }

    #[test]
    fn no_activity_rebuilds_to_zero() {
        let agg = PopularityAggregate::from_checkins(&[], now());
        assert!(agg.is_zero());
        assert_eq!(agg, PopularityAggregate::zero());
    }

    #[test]
    fn mixed_ages_count_per_window() {
        let now = now();
        let checkins = [
            at(now, 10),           // recent + weekly
            at(now, 2 * 24 * 60),  // weekly only
            at(now, 30 * 24 * 60), // total only
        ];
        let agg = PopularityAggregate::from_checkins(&checkins, now);
        assert_eq!(agg.recent_count, 1);
        assert_eq!(agg.weekly_count, 2);
        assert_eq!(agg.total_count, 3);
        assert_eq!(agg.score, 5.0 + 4.0 + 1.5);
    }
}
