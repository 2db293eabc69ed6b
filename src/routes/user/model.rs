use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: String,
    pub nickname: String,
    /// 旧平台上的用户标识，迁移时用于解析参与者
    pub legacy_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub nickname: String,
    pub legacy_id: Option<String>,
}

impl User {
    pub async fn create(pool: &PgPool, req: CreateUserRequest) -> Result<Self, AppError> {
        let nickname = req.nickname.trim();
        if nickname.is_empty() {
            return Err(AppError::InvalidArgument("昵称不能为空".to_string()));
        }

        let user_id = Uuid::new_v4().to_string();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, nickname, legacy_id, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING user_id, nickname, legacy_id, created_at
            "#,
        )
        .bind(&user_id)
        .bind(nickname)
        .bind(&req.legacy_id)
        .fetch_one(pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::Conflict("旧平台标识已被占用".to_string()),
            other => other,
        })?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, nickname, legacy_id, created_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn exists(pool: &PgPool, user_id: &str) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM users WHERE user_id = $1)"#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}
