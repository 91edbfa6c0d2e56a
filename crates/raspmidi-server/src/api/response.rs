//! Success envelope and request extraction helpers.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::ApiError;

pub type ApiResult = Result<Json<Value>, ApiError>;

/// `{success: true, data}`
pub fn data<T: Serialize>(data: T) -> ApiResult {
    envelope(data, [])
}

/// `{success: true, data, message}`
pub fn data_with_message<T: Serialize>(data: T, message: impl Into<String>) -> ApiResult {
    envelope(data, [("message", Value::String(message.into()))])
}

/// `{success: true, message}`
pub fn message(message: impl Into<String>) -> ApiResult {
    Ok(Json(json!({
        "success": true,
        "message": message.into(),
    })))
}

/// `{success: true, data, ...extra}`
pub fn envelope<T: Serialize, const N: usize>(
    data: T,
    extra: [(&str, Value); N],
) -> ApiResult {
    let data = serde_json::to_value(data)
        .map_err(|e| ApiError::new(axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    body.insert("data".to_string(), data);
    for (key, value) in extra {
        body.insert(key.to_string(), value);
    }
    Ok(Json(Value::Object(body)))
}

pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e.body_text())))
}

/// Like [`body`], but a missing or empty body means `T::default()`.
pub fn optional_body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(JsonRejection::JsonSyntaxError(e)) if e.body_text().contains("EOF") => Ok(T::default()),
        Err(e) => Err(ApiError::bad_request(format!(
            "Invalid request body: {}",
            e.body_text()
        ))),
    }
}

pub fn path<T>(param: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    param
        .map(|Path(value)| value)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

pub fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(value)| value)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}
