use crate::config::DeriverConfig;
use crate::error::{PaygenError, Result};
use crate::models::{OperationType, PaymentPayload, SubmissionRecord, TransactionDetail};
use crate::util::{format_timestamp, format_timestamp_seconds};

use chrono::NaiveDateTime;
use uuid::Uuid;

pub const STATUS_COMPLETED: &str = "COMPLETED";

// Namespace for derived transaction ids, so re-deriving a submission yields the same id.
const DERIVED_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_4b7d_4c55_9e0a_3d2b_8f61_c4a7);

pub fn transaction_type_for(operation_type: Option<&OperationType>) -> &'static str {
    match operation_type {
        Some(OperationType::IndividualEntrepreneur) => "INDTAX",
        Some(OperationType::Corporate) => "CORPTAX",
        _ => "EMPLTAX",
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdealTransactionDeriver {
    config: DeriverConfig,
}

impl IdealTransactionDeriver {
    pub fn new(config: DeriverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeriverConfig {
        &self.config
    }

    pub fn derive(&self, payload: &PaymentPayload, submitted_at: &NaiveDateTime) -> TransactionDetail {
        self.derive_stamped(payload, submitted_at, format_timestamp(submitted_at))
    }

    // `modified_date` is the submission timestamp exactly as it was recorded.
    fn derive_stamped(
        &self,
        payload: &PaymentPayload,
        submitted_at: &NaiveDateTime,
        modified_date: String,
    ) -> TransactionDetail {
        let (payment_year, payment_quarter, period) = derive_period(payload);

        let ugd = payload.ugd.as_ref();
        let purpose = payload.purpose.clone().unwrap_or_default();
        let knp = match payload.purpose.as_deref() {
            Some(text) => format!("{}-{}", payload.knp, text),
            None => payload.knp.clone(),
        };

        TransactionDetail {
            transaction_type: transaction_type_for(payload.taxes_payment_operation_type.as_ref())
                .to_string(),
            id: derived_id(&payload.transaction_id, &modified_date),
            transaction_id: payload.transaction_id.clone(),
            created_date: format_timestamp_seconds(submitted_at),
            modified_date,
            status: STATUS_COMPLETED.to_string(),
            amount: payload.amount,
            another_amount: None,
            currency: self.config.currency.clone(),
            another_currency: None,
            commission: self.config.commission,
            counterparty: ugd.and_then(|ugd| ugd.name.clone()),
            purpose,
            iban_debit: Some(payload.iban_debit.clone()),
            iban_credit: Some(self.config.iban_credit.clone()),
            credit_identifier: ugd.and_then(|ugd| ugd.code.clone()),
            exchange_direction: None,
            fact_sender_name: None,
            fact_sender_iin: None,
            error_message: None,
            knp,
            ugd_bin: ugd.and_then(|ugd| ugd.bin.clone()),
            kbk_name: payload
                .kbk
                .as_ref()
                .map(|kbk| kbk.name.clone())
                .unwrap_or_default(),
            kbk_code: payload
                .kbk
                .as_ref()
                .map(|kbk| kbk.code.to_string())
                .unwrap_or_default(),
            knp_code: payload.knp.clone(),
            payment_half_year: None,
            payment_year,
            period,
            payment_quarter,
            employees: Vec::new(),
            debit: true,
        }
    }

    pub fn derive_record(&self, record: &SubmissionRecord) -> Result<TransactionDetail> {
        let submitted_at = record.submitted_at().map_err(|err| {
            PaygenError::InvalidRequest(format!(
                "invalid timestamp '{}' for {}: {}",
                record.timestamp, record.payload.transaction_id, err
            ))
        })?;
        Ok(self.derive_stamped(&record.payload, &submitted_at, record.timestamp.clone()))
    }
}

fn derived_id(transaction_id: &str, modified_date: &str) -> String {
    let name = format!("{transaction_id}|{modified_date}");
    Uuid::new_v5(&DERIVED_ID_NAMESPACE, name.as_bytes()).to_string()
}

fn derive_period(payload: &PaymentPayload) -> (Option<i32>, Option<u8>, Option<String>) {
    let quarter_number = payload.quarter.map(|quarter| quarter.number());
    if let Some(period) = &payload.period {
        return (payload.year, quarter_number, Some(period.clone()));
    }
    match (payload.year, payload.quarter) {
        (Some(year), Some(quarter)) => (
            Some(year),
            Some(quarter.number()),
            Some(format!("{}-{}", year, quarter.end_month_day())),
        ),
        _ => (payload.year, quarter_number, None),
    }
}
