use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use stallmap_shared::BrokerResponse;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Invalid map id")]
    InvalidMapId,

    #[error("Map {0} is not served by this broker")]
    UnservedMap(String),

    #[error("Map broker is not configured: set MAP_API_KEY and MAP_API_SECRET")]
    NotConfigured,

    #[error("Mapping service rejected the credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("Mapping service error: {0}")]
    Upstream(String),
}

impl BrokerError {
    pub fn status(&self) -> StatusCode {
        match self {
            BrokerError::InvalidMapId => StatusCode::BAD_REQUEST,
            BrokerError::UnservedMap(_) => StatusCode::FORBIDDEN,
            BrokerError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::Unauthorized { .. } | BrokerError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        BrokerError::Upstream(e.to_string())
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(BrokerResponse::failure(self.to_string()))).into_response()
    }
}
