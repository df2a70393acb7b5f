//! The ROS XML-RPC envelope.
//!
//! Every ROS API response is a 3-tuple `[status, message, value]` where
//! status 1 means success, 0 a failure on the far side, and -1 a caller
//! error. The envelope is folded into [ApiResponse] here so callers only
//! ever see the payload value or a typed error.

use dxr::{TryFromValue, TryToValue, Value};

pub mod client;

const STATUS_SUCCESS: i32 = 1;
const STATUS_FAILURE: i32 = 0;
const STATUS_ERROR: i32 = -1;

type ResponseTuple = (i32, String, Value);

#[derive(thiserror::Error, Debug, Clone)]
pub enum ApiError {
    /// The far side understood the call but could not complete it
    /// (status code 0).
    #[error("Request failed: {0}")]
    Failure(String),
    /// The caller did something wrong, e.g. an invalid parameter
    /// (status code -1).
    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    pub fn failure(msg: impl Into<String>) -> Self {
        ApiError::Failure(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

/// A decoded `[status, message, value]` response tuple.
pub enum ApiResponse {
    Success(String, Value),
    Error(ApiError),
}

impl From<ApiError> for ApiResponse {
    fn from(value: ApiError) -> Self {
        ApiResponse::Error(value)
    }
}

impl TryToValue for ApiResponse {
    fn try_to_value(&self) -> Result<Value, dxr::DxrError> {
        match self {
            ApiResponse::Success(msg, data) => (STATUS_SUCCESS, msg, data.clone()),
            ApiResponse::Error(ApiError::Failure(msg)) => (STATUS_FAILURE, msg, Value::i4(0)),
            ApiResponse::Error(ApiError::Invalid(msg)) => (STATUS_ERROR, msg, Value::i4(0)),
        }
        .try_to_value()
    }
}

impl TryFromValue for ApiResponse {
    fn try_from_value(value: &Value) -> Result<Self, dxr::DxrError> {
        let (status_code, msg, data) = ResponseTuple::try_from_value(value)?;

        match status_code {
            STATUS_SUCCESS => Ok(ApiResponse::Success(msg, data)),
            STATUS_FAILURE => Ok(ApiResponse::Error(ApiError::Failure(msg))),
            STATUS_ERROR => Ok(ApiResponse::Error(ApiError::Invalid(msg))),
            other => Err(dxr::DxrError::invalid_data(format!(
                "invalid ROS status code: {other}"
            ))),
        }
    }
}
