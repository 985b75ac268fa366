use crate::services::{
    access::{GrantOutcome, RevokeOutcome},
    grant_store::GrantEntry,
};
use actix_web::{HttpResponse, error::InternalError, web};
use anyhow::Result;
use log::error;
use serde::{Deserialize, Serialize};

/// Body of every mutating endpoint
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> HttpResponse {
        HttpResponse::Ok().json(ApiResponse {
            success: true,
            message: message.into(),
        })
    }

    pub fn bad_request(message: impl Into<String>) -> HttpResponse {
        HttpResponse::BadRequest().json(ApiResponse {
            success: false,
            message: message.into(),
        })
    }

    pub fn internal_error(message: impl Into<String>) -> HttpResponse {
        HttpResponse::InternalServerError().json(ApiResponse {
            success: false,
            message: message.into(),
        })
    }
}

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for GrantOutcome {
    fn into_response(self) -> HttpResponse {
        ApiResponse::ok(self.message())
    }
}

impl ServiceResultResponse for RevokeOutcome {
    fn into_response(self) -> HttpResponse {
        ApiResponse::ok(self.message())
    }
}

impl ServiceResultResponse for Vec<GrantEntry> {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().json(self)
    }
}

/// Convert a service result into a response
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Operation name used in the log
/// * `failure` - Message prefix returned to the caller on error
///
/// # Returns
/// * `HttpResponse` - The ServiceResultResponse or a 500 `ApiResponse`
pub fn handle_service_result<T>(result: Result<T>, operation: &str, failure: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");
            ApiResponse::internal_error(format!("{failure}: {e:#}"))
        }
    }
}

/// JSON extractor config answering malformed bodies with a 400 `ApiResponse`
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(65_536)
        .error_handler(|err, _req| {
            error!("failed to extract json body: {err}");
            let response = ApiResponse::bad_request(format!("Requisição inválida: {err}"));
            InternalError::from_response(err, response).into()
        })
}
