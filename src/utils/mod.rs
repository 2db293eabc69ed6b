use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 通用的API响应结构
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 错误码，0表示成功，非0表示失败
    pub code: i32,
    /// 错误消息，成功时为"success"
    pub msg: String,
    /// 响应数据，错误时为None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

/// 把业务错误转成响应，内部细节只进日志
pub fn app_error_to_api_response<T>(err: &AppError) -> Json<ApiResponse<T>> {
    error_to_api_response(err.code(), err.public_message())
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const CONFLICT: i32 = 1001;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const TRANSIENT: i32 = 1006;
    pub const INTERNAL_ERROR: i32 = 5000;
}

/// 地球半径（米）
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 米转英里的系数
pub const METERS_TO_MILES: f64 = 0.000_621_371;

// 计算球面距离的函数（基于经纬度）
pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // 使用Haversine公式计算距离
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c // 返回距离（米）
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters * METERS_TO_MILES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let d = calculate_distance(30.267, -97.743, 30.267, -97.743);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = calculate_distance(30.267, -97.743, 30.28, -97.75);
        let b = calculate_distance(30.28, -97.75, 30.267, -97.743);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn one_degree_latitude_is_about_111km() {
        let d = calculate_distance(30.0, -97.0, 31.0, -97.0);
        assert!((d - 111_195.0).abs() < 500.0, "got {}", d);
    }

    #[test]
    fn meters_to_miles_conversion() {
        let miles = meters_to_miles(1609.34);
        assert!((miles - 1.0).abs() < 0.001, "got {}", miles);
        assert!((meters_to_miles(1000.0) - 0.621371).abs() < 1e-9);
    }

    #[test]
    fn error_envelope_serializes_without_data_field() {
        let resp: ApiResponse<()> = ApiResponse {
            code: error_codes::NOT_FOUND,
            msg: "记录不存在".into(),
            resp_data: None,
        };
        let json = serde_json::to_string(&resp).expect("serialize");
        assert!(json.contains("\"code\":1004"));
        assert!(!json.contains("resp_data"));
    }
}
