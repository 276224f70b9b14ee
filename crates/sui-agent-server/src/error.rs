use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Prefix of every environment variable read by the settings loader
pub const ENV_PREFIX: &str = "SUI_AGENT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration, set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },
    #[error("{env_var} environment variable not set. This service should be launched by sui-cli")]
    MissingSecret { env_var: String },
    #[error("Invalid listen address {host}:{port}")]
    InvalidAddress { host: String, port: u16 },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted settings field, e.g. `provider.api_key`
pub fn to_env_var(field: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        field.to_uppercase().replace('.', "__")
    )
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Request failure reported to the caller with the `unknown` code
#[derive(Debug)]
pub struct ApiError {
    message: String,
}

impl ApiError {
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: "unknown",
            message: self.message,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
