use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Account,
    Kbk,
    Knp,
    Ugd,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Entity::Account => "account",
            Entity::Kbk => "KBK",
            Entity::Knp => "KNP",
            Entity::Ugd => "UGD",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PaygenError {
    #[error("reference data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{entity} with code {code} not found")]
    NotFound { entity: Entity, code: String },

    #[error("request to {endpoint} failed: {message}")]
    UpstreamRequestFailed { endpoint: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PaygenError {
    pub fn not_found(entity: Entity, code: impl ToString) -> Self {
        PaygenError::NotFound {
            entity,
            code: code.to_string(),
        }
    }

    pub fn upstream(endpoint: &str, message: impl ToString) -> Self {
        PaygenError::UpstreamRequestFailed {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaygenError>;
