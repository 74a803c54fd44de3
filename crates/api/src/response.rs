//! RPC响应信封
//!
//! 所有端点统一返回HTTP 200，业务结果由code字段表达。Worker端只需
//! 判断code即可区分成功与失败，不依赖HTTP状态码。

use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use taskmaster_core::SchedulerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Success,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub code: ResponseCode,
    pub content: serde_json::Value,
}

impl RpcResponse {
    pub fn success<T: Serialize>(content: T) -> Self {
        Self {
            code: ResponseCode::Success,
            content: serde_json::to_value(content).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Fail,
            content: serde_json::Value::String(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::Success
    }
}

impl From<SchedulerError> for RpcResponse {
    fn from(err: SchedulerError) -> Self {
        Self::fail(err.to_string())
    }
}

impl IntoResponse for RpcResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// 把业务Result折叠进信封，错误不外泄为非200状态
pub fn envelope<T: Serialize>(result: Result<T, SchedulerError>) -> RpcResponse {
    match result {
        Ok(content) => RpcResponse::success(content),
        Err(err) => {
            tracing::warn!("请求处理失败: {}", err);
            err.into()
        }
    }
}
