use crate::models::OperationType;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://sme-bff.kz.infra";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub token: String,
    pub operation_type: OperationType,
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            operation_type: OperationType::IndividualEntrepreneur,
            accept_invalid_certs: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct DeriverConfig {
    pub commission: f64,
    pub iban_credit: String,
    pub currency: String,
}

impl Default for DeriverConfig {
    // Placeholder label values; the ledger's real commission and credit account are not modelled.
    fn default() -> Self {
        Self {
            commission: 150.0,
            iban_credit: "KZ24070105KSN0000000".to_string(),
            currency: "KZT".to_string(),
        }
    }
}
