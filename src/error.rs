use crate::utils::error_codes;

/// 业务错误分类
///
/// Conflict / NotFound / InvalidArgument 携带可以直接展示给调用方的消息；
/// Transient / Internal 的内部细节只进日志，对外返回固定文案。
#[derive(Debug)]
pub enum AppError {
    /// 参数缺失或格式错误
    InvalidArgument(String),
    /// 重复的活跃签到等冲突
    Conflict(String),
    /// 目标记录不存在
    NotFound(String),
    /// 存储超时、连接抖动等可重试错误
    Transient(String),
    /// 其他内部错误
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Transient(_) => "transient",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::InvalidArgument(_) => error_codes::VALIDATION_ERROR,
            AppError::Conflict(_) => error_codes::CONFLICT,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::Transient(_) => error_codes::TRANSIENT,
            AppError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// 对外展示的消息，内部存储错误文本不外泄
    pub fn public_message(&self) -> String {
        match self {
            AppError::InvalidArgument(msg)
            | AppError::Conflict(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::Transient(_) => "服务暂时不可用，请稍后重试".to_string(),
            AppError::Internal(_) => "内部服务器错误".to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            AppError::Conflict(msg) => write!(f, "conflict: {}", msg),
            AppError::NotFound(msg) => write!(f, "not found: {}", msg),
            AppError::Transient(msg) => write!(f, "transient: {}", msg),
            AppError::Internal(msg) => write!(f, "internal: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("记录不存在".to_string()),
            sqlx::Error::PoolTimedOut => {
                AppError::Transient("database pool timed out".to_string())
            }
            sqlx::Error::Io(e) => AppError::Transient(format!("database io error: {}", e)),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("记录已存在".to_string())
            }
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                AppError::NotFound("关联记录不存在".to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        // 缓存层错误一律按可重试处理
        AppError::Transient(format!("redis error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            AppError::InvalidArgument("x".into()).code(),
            error_codes::VALIDATION_ERROR
        );
        assert_eq!(AppError::Conflict("x".into()).code(), error_codes::CONFLICT);
        assert_eq!(AppError::NotFound("x".into()).code(), error_codes::NOT_FOUND);
        assert_eq!(AppError::Transient("x".into()).code(), error_codes::TRANSIENT);
        assert_eq!(
            AppError::Internal("x".into()).code(),
            error_codes::INTERNAL_ERROR
        );
    }

    #[test]
    fn internal_detail_never_leaks() {
        let err = AppError::Internal("connection refused at 10.0.0.3:5432".into());
        assert!(!err.public_message().contains("10.0.0.3"));
        let err = AppError::Transient("pool timed out".into());
        assert!(!err.public_message().contains("pool"));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn sqlx_pool_timeout_maps_to_transient() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), "transient");
    }
}
