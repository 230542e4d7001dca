use crate::config::SessionConfig;
use crate::error::{PaygenError, Result};
use crate::models::{
    Account, AccountList, Kbk, OperationType, PaymentPayload, PeriodDictionary,
    TransactionDetail, TransactionPage, TransactionSummary, Ugd,
};
use crate::reconcile::LedgerSource;
use crate::reference::DictionarySource;
use crate::submit::{CommissionRequest, PaymentApi};

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub const ACCOUNTS_ENDPOINT: &str = "/api/account/accounts";
pub const KBK_ENDPOINT: &str = "/api/dictionary/dictionary/kbk/kbk-to-knp-list";
pub const UGD_ENDPOINT: &str = "/api/dictionary/dictionary/ugd/all";
pub const PERIOD_ENDPOINT: &str = "/api/dictionary/dictionary/payment-period";
pub const COMMISSION_ENDPOINT: &str = "/api/charge-calculator/api/v1/charges/trn/multi-calculate";
pub const PAYMENT_ENDPOINT: &str = "/api/payment/api/v5/budget/init/entrepreneur";
pub const HISTORY_SEARCH_ENDPOINT: &str = "/api/payment-history/api/v1/history/transactions";
pub const HISTORY_DETAIL_ENDPOINT: &str = "/api/payment-history/api/v1/history/transaction";

const HISTORY_PAGE_SIZE: u32 = 20;
const HISTORY_MAX_PAGES: u32 = 10;
const ERROR_BODY_LIMIT: usize = 512;

/// Blocking client for the banking BFF. One instance per session; every call carries the bearer token.
pub struct ApiClient {
    http: Client,
    config: SessionConfig,
}

impl ApiClient {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|err| PaygenError::InvalidRequest(format!("invalid token: {err}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if config.accept_invalid_certs {
            log::warn!("TLS certificate verification disabled for {}", config.base_url);
        }
        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|err| PaygenError::upstream(&config.base_url, err))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .map_err(|err| PaygenError::upstream(endpoint, err))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| PaygenError::upstream(endpoint, err))?;
        log::debug!("{} -> {} ({} bytes)", endpoint, status, body.len());

        if !status.is_success() {
            return Err(PaygenError::upstream(
                endpoint,
                format!("HTTP {}: {}", status, truncate_body(&body)),
            ));
        }
        parse_body(endpoint, &body)
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        let request = self.http.get(self.config.url(endpoint)).query(query);
        self.send(endpoint, request)
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let request = self.http.post(self.config.url(endpoint)).json(body);
        self.send(endpoint, request)
    }
}

impl DictionarySource for ApiClient {
    fn accounts(&self) -> Result<Vec<Account>> {
        let list: AccountList = decode(ACCOUNTS_ENDPOINT, self.get(ACCOUNTS_ENDPOINT, &[])?)?;
        Ok(list.accounts)
    }

    fn kbk_list(&self, operation_type: &OperationType) -> Result<Vec<Kbk>> {
        let query = [("taxesPaymentOperationType", operation_type.to_string())];
        let value = self.get(KBK_ENDPOINT, &query)?;
        decode_list(KBK_ENDPOINT, value)
    }

    fn ugd_list(&self) -> Result<Vec<Ugd>> {
        let value = self.get(UGD_ENDPOINT, &[])?;
        decode_list(UGD_ENDPOINT, value)
    }

    fn payment_periods(
        &self,
        operation_type: &OperationType,
        kbk_code: u64,
        knp_code: &str,
    ) -> Result<Option<PeriodDictionary>> {
        let query = [
            ("operationType", operation_type.to_string()),
            ("kbk", kbk_code.to_string()),
            ("knp", knp_code.to_string()),
            ("id", "0".to_string()),
        ];
        let value = self.get(PERIOD_ENDPOINT, &query)?;
        decode_optional(PERIOD_ENDPOINT, value)
    }
}

impl PaymentApi for ApiClient {
    fn calculate_commission(&self, request: &CommissionRequest) -> Result<Value> {
        let body = serde_json::to_value([request])?;
        let http = self.http.put(self.config.url(COMMISSION_ENDPOINT)).json(&body);
        self.send(COMMISSION_ENDPOINT, http)
    }

    fn submit_payment(&self, payload: &PaymentPayload) -> Result<Value> {
        let body = serde_json::to_value(payload)?;
        self.post(PAYMENT_ENDPOINT, &body)
    }
}

impl LedgerSource for ApiClient {
    fn find_transaction(
        &self,
        ibans: &[String],
        transaction_id: &str,
    ) -> Result<Option<TransactionSummary>> {
        scan_history(transaction_id, |page| {
            let value = self.post(HISTORY_SEARCH_ENDPOINT, &history_search_body(ibans, page))?;
            let page: Option<TransactionPage> = decode_optional(HISTORY_SEARCH_ENDPOINT, value)?;
            Ok(page.map(|page| page.transactions).unwrap_or_default())
        })
    }

    fn transaction_detail(&self, summary: &TransactionSummary) -> Result<Option<TransactionDetail>> {
        let body = json!({ "id": summary.id, "type": summary.transaction_type });
        let mut value = self.post(HISTORY_DETAIL_ENDPOINT, &body)?;
        let transaction = value.get_mut("transaction").map(Value::take).unwrap_or(Value::Null);
        decode_optional(HISTORY_DETAIL_ENDPOINT, transaction)
    }
}

// Newest first; stops at a short page or after HISTORY_MAX_PAGES.
fn scan_history<F>(transaction_id: &str, mut fetch_page: F) -> Result<Option<TransactionSummary>>
where
    F: FnMut(u32) -> Result<Vec<TransactionSummary>>,
{
    for page in 0..HISTORY_MAX_PAGES {
        let rows = fetch_page(page)?;
        let exhausted = rows.len() < HISTORY_PAGE_SIZE as usize;
        if let Some(row) = rows.into_iter().find(|row| row.transaction_id == transaction_id) {
            return Ok(Some(row));
        }
        if exhausted {
            return Ok(None);
        }
    }
    log::warn!(
        "{} not among the newest {} history rows; older transactions are not searched",
        transaction_id,
        HISTORY_PAGE_SIZE * HISTORY_MAX_PAGES
    );
    Ok(None)
}

fn history_search_body(ibans: &[String], page: u32) -> Value {
    json!({
        "search": { "iban": ibans },
        "pageable": {
            "page": page,
            "size": HISTORY_PAGE_SIZE,
            "sort": { "property": "createdDate", "direction": "DESC" }
        }
    })
}

fn parse_body(endpoint: &str, body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|err| PaygenError::upstream(endpoint, format!("malformed response: {err}")))
}

fn decode<T: DeserializeOwned>(endpoint: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| PaygenError::upstream(endpoint, format!("unexpected response shape: {err}")))
}

fn decode_optional<T: DeserializeOwned>(endpoint: &str, value: Value) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    decode(endpoint, value).map(Some)
}

fn decode_list<T: DeserializeOwned>(endpoint: &str, value: Value) -> Result<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    decode(endpoint, value)
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bodies_decode_as_absent() {
        let value = parse_body(PERIOD_ENDPOINT, "  ").unwrap();
        let periods: Option<PeriodDictionary> = decode_optional(PERIOD_ENDPOINT, value).unwrap();
        assert!(periods.is_none());

        let value = parse_body(PERIOD_ENDPOINT, "null").unwrap();
        let periods: Option<PeriodDictionary> = decode_optional(PERIOD_ENDPOINT, value).unwrap();
        assert!(periods.is_none());

        let kbk: Vec<Kbk> = decode_list(KBK_ENDPOINT, Value::Null).unwrap();
        assert!(kbk.is_empty());
    }

    #[test]
    fn period_body_decodes() {
        let body = r#"{"periodType": "QUARTER", "periods": [{"year": 2025, "quarter": "FIRST", "yearHalf": null}]}"#;
        let value = parse_body(PERIOD_ENDPOINT, body).unwrap();
        let periods: Option<PeriodDictionary> = decode_optional(PERIOD_ENDPOINT, value).unwrap();
        let periods = periods.unwrap();
        assert_eq!(periods.period_type.as_deref(), Some("QUARTER"));
        assert_eq!(periods.periods.len(), 1);
    }

    #[test]
    fn malformed_bodies_are_upstream_failures() {
        match parse_body(UGD_ENDPOINT, "<html>gateway</html>") {
            Err(PaygenError::UpstreamRequestFailed { endpoint, .. }) => {
                assert_eq!(endpoint, UGD_ENDPOINT)
            }
            other => panic!("unexpected: {other:?}"),
        }

        let result: Result<Vec<Ugd>> = decode_list(UGD_ENDPOINT, json!({"items": []}));
        assert!(matches!(
            result,
            Err(PaygenError::UpstreamRequestFailed { .. })
        ));
    }

    #[test]
    fn history_search_body_shape() {
        let body = history_search_body(&["KZ92886A220120705719".to_string()], 3);
        assert_eq!(body["search"]["iban"][0], "KZ92886A220120705719");
        assert_eq!(body["pageable"]["page"], 3);
        assert_eq!(body["pageable"]["size"], 20);
        assert_eq!(body["pageable"]["sort"]["property"], "createdDate");
        assert_eq!(body["pageable"]["sort"]["direction"], "DESC");
    }

    fn history_rows(page: u32, count: usize) -> Vec<TransactionSummary> {
        (0..count)
            .map(|row| TransactionSummary {
                transaction_id: format!("T{page}-{row}"),
                ..TransactionSummary::default()
            })
            .collect()
    }

    #[test]
    fn history_scan_pages_past_the_newest_rows() {
        let mut requested = Vec::new();
        let found = scan_history("T2-5", |page| {
            requested.push(page);
            Ok(history_rows(page, HISTORY_PAGE_SIZE as usize))
        })
        .unwrap();
        assert_eq!(found.unwrap().transaction_id, "T2-5");
        assert_eq!(requested, vec![0, 1, 2]);
    }

    #[test]
    fn history_scan_stops_at_short_page_and_page_limit() {
        let mut requested = Vec::new();
        let found = scan_history("T9-0", |page| {
            requested.push(page);
            let size = if page == 1 { 4 } else { HISTORY_PAGE_SIZE as usize };
            Ok(history_rows(page, size))
        })
        .unwrap();
        assert!(found.is_none());
        assert_eq!(requested, vec![0, 1]);

        let mut calls = 0;
        let found = scan_history("absent", |page| {
            calls += 1;
            Ok(history_rows(page, HISTORY_PAGE_SIZE as usize))
        })
        .unwrap();
        assert!(found.is_none());
        assert_eq!(calls, HISTORY_MAX_PAGES);
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(ERROR_BODY_LIMIT + 10);
        let truncated = truncate_body(&body);
        assert_eq!(truncated.len(), ERROR_BODY_LIMIT + 3);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_body(" short "), "short");
    }

    #[test]
    fn rejects_tokens_that_cannot_be_headers() {
        let config = SessionConfig::new("https://bff.example", "bad\ntoken");
        assert!(matches!(
            ApiClient::new(config),
            Err(PaygenError::InvalidRequest(_))
        ));
    }
}
