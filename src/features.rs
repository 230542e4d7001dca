use crate::error::Result;
use crate::models::{OperationType, PaymentPayload, Quarter, TransactionDetail};
use crate::util::hash_unit;

use chrono::{NaiveDateTime, Timelike};
use std::fs::create_dir_all;
use std::path::Path;

pub const PAYLOAD_FEATURES: [&str; 21] = [
    "amount",
    "kbk_code",
    "knp",
    "year",
    "quarter_1",
    "quarter_2",
    "quarter_3",
    "quarter_4",
    "has_period",
    "op_individual",
    "op_corporate",
    "op_employee",
    "kbk_employee_flag",
    "kbk_ugd_flag",
    "kbk_name",
    "has_ugd",
    "ugd_code",
    "ugd_bin",
    "ugd_name",
    "purpose_len",
    "iban_prefix",
];

const STATUSES: [&str; 4] = ["COMPLETED", "FAILED", "PENDING", "REVERSED"];
const TRANSACTION_TYPES: [&str; 4] = ["EMPLTAX", "INDNTRTAX", "CORPTAX", "INDTAX"];

pub const TRANSACTION_FEATURES: [&str; 37] = [
    "amount",
    "another_amount",
    "commission",
    "kbk_code",
    "status_completed",
    "status_failed",
    "status_pending",
    "status_reversed",
    "type_empltax",
    "type_indntrtax",
    "type_corptax",
    "type_indtax",
    "is_debit",
    "has_error",
    "payment_year",
    "payment_quarter",
    "payment_half_year",
    "created_hour",
    "modified_hour",
    "has_period",
    "period_length",
    "currency_kzt",
    "another_currency_present",
    "exchange_dir_present",
    "iban_credit_present",
    "has_ugd",
    "ugd_bin_hash",
    "credit_id_hash",
    "sender_iin_present",
    "purpose_len",
    "counterparty_len",
    "iban_debit_prefix",
    "kbk_name_hash",
    "knp_code_present",
    "knp_present",
    "sender_name_present",
    "employees_count",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub names: Vec<&'static str>,
    pub values: Vec<f32>,
}

impl FeatureVector {
    fn from_pairs(pairs: Vec<(&'static str, f32)>) -> Self {
        let (names, values) = pairs.into_iter().unzip();
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.names
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| self.values[index])
    }
}

pub trait FeatureEncoder {
    fn encode_payload(&self, payload: &PaymentPayload) -> FeatureVector;

    fn encode_transaction(&self, transaction: &TransactionDetail) -> FeatureVector;
}

/// Fixed-width encoding used for the anomaly-model training set.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEncoder;

impl FeatureEncoder for StandardEncoder {
    fn encode_payload(&self, payload: &PaymentPayload) -> FeatureVector {
        let kbk = payload.kbk.as_ref();
        let quarter = payload.quarter;
        let op = payload.taxes_payment_operation_type.as_ref();
        let ugd = payload.ugd.as_ref();

        let knp = match payload.knp.parse::<f32>() {
            Ok(value) if payload.knp.chars().all(|ch| ch.is_ascii_digit()) => value,
            _ => hash_unit(&payload.knp),
        };

        FeatureVector::from_pairs(vec![
            ("amount", (payload.amount / 1_000_000.0) as f32),
            ("kbk_code", kbk.map_or(0.0, |kbk| kbk.code as f32 / 1_000_000.0)),
            ("knp", knp),
            ("year", payload.year.map_or(0.0, year_feature)),
            ("quarter_1", flag(quarter == Some(Quarter::First))),
            ("quarter_2", flag(quarter == Some(Quarter::Second))),
            ("quarter_3", flag(quarter == Some(Quarter::Third))),
            ("quarter_4", flag(quarter == Some(Quarter::Fourth))),
            ("has_period", flag(present(payload.period.as_deref()))),
            ("op_individual", flag(op == Some(&OperationType::IndividualEntrepreneur))),
            ("op_corporate", flag(op == Some(&OperationType::Corporate))),
            ("op_employee", flag(op == Some(&OperationType::Employee))),
            ("kbk_employee_flag", flag(kbk.is_some_and(|kbk| kbk.employee_loading_required))),
            ("kbk_ugd_flag", flag(kbk.is_some_and(|kbk| kbk.ugd_loading_required))),
            ("kbk_name", hash_unit(kbk.map_or("", |kbk| kbk.name.as_str()))),
            ("has_ugd", flag(ugd.is_some())),
            ("ugd_code", ugd.map_or(0.0, |ugd| numeric_scaled(ugd.code.as_deref()))),
            ("ugd_bin", ugd.map_or(0.0, |ugd| numeric_scaled(ugd.bin.as_deref()))),
            ("ugd_name", ugd.map_or(0.0, |ugd| hash_unit(ugd.name.as_deref().unwrap_or("")))),
            ("purpose_len", text_len(payload.purpose.as_deref(), 200.0)),
            ("iban_prefix", hash_unit(&payload.iban_debit)),
        ])
    }

    fn encode_transaction(&self, transaction: &TransactionDetail) -> FeatureVector {
        let created_hour = hour_of(&transaction.created_date).unwrap_or(12);
        let modified_hour = hour_of(&transaction.modified_date).unwrap_or(created_hour);
        let kbk_code = transaction.kbk_code.parse::<f32>().unwrap_or(0.0);

        let mut pairs = vec![
            ("amount", (transaction.amount / 1_000_000.0) as f32),
            (
                "another_amount",
                transaction.another_amount.map_or(0.0, |value| (value / 1_000_000.0) as f32),
            ),
            ("commission", (transaction.commission / 1000.0) as f32),
            ("kbk_code", kbk_code / 1_000_000.0),
        ];
        for (name, status) in TRANSACTION_FEATURES[4..8].iter().zip(STATUSES) {
            pairs.push((*name, flag(transaction.status == status)));
        }
        for (name, kind) in TRANSACTION_FEATURES[8..12].iter().zip(TRANSACTION_TYPES) {
            pairs.push((*name, flag(transaction.transaction_type == kind)));
        }
        pairs.extend([
            ("is_debit", flag(transaction.debit)),
            ("has_error", flag(present(transaction.error_message.as_deref()))),
            ("payment_year", transaction.payment_year.map_or(0.0, year_feature)),
            (
                "payment_quarter",
                transaction.payment_quarter.map_or(0.0, |q| f32::from(q) / 4.0),
            ),
            (
                "payment_half_year",
                transaction.payment_half_year.map_or(0.0, |h| f32::from(h) / 2.0),
            ),
            ("created_hour", created_hour as f32 / 24.0),
            ("modified_hour", modified_hour as f32 / 24.0),
            ("has_period", flag(present(transaction.period.as_deref()))),
            ("period_length", text_len(transaction.period.as_deref(), 50.0)),
            ("currency_kzt", flag(transaction.currency == "KZT")),
            (
                "another_currency_present",
                flag(present(transaction.another_currency.as_deref())),
            ),
            (
                "exchange_dir_present",
                flag(present(transaction.exchange_direction.as_deref())),
            ),
            ("iban_credit_present", flag(present(transaction.iban_credit.as_deref()))),
            ("has_ugd", flag(present(transaction.ugd_bin.as_deref()))),
            ("ugd_bin_hash", optional_hash(transaction.ugd_bin.as_deref())),
            ("credit_id_hash", optional_hash(transaction.credit_identifier.as_deref())),
            ("sender_iin_present", flag(present(transaction.fact_sender_iin.as_deref()))),
            ("purpose_len", text_len(Some(&transaction.purpose), 200.0)),
            ("counterparty_len", text_len(transaction.counterparty.as_deref(), 200.0)),
            ("iban_debit_prefix", iban_digits_prefix(transaction.iban_debit.as_deref())),
            ("kbk_name_hash", optional_hash(Some(&transaction.kbk_name))),
            ("knp_code_present", flag(!transaction.knp_code.is_empty())),
            ("knp_present", flag(!transaction.knp.is_empty())),
            ("sender_name_present", flag(present(transaction.fact_sender_name.as_deref()))),
            ("employees_count", transaction.employees.len() as f32 / 10.0),
        ]);

        FeatureVector::from_pairs(pairs)
    }
}

/// One CSV row per submission: payload features then ideal-transaction features.
pub fn write_feature_csv(
    path: &Path,
    rows: &[(String, FeatureVector, FeatureVector)],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["transaction_id".to_string()];
    header.extend(PAYLOAD_FEATURES.iter().map(|name| format!("payload_{name}")));
    header.extend(TRANSACTION_FEATURES.iter().map(|name| format!("tx_{name}")));
    writer.write_record(&header)?;

    for (transaction_id, payload, transaction) in rows {
        let mut record = Vec::with_capacity(header.len());
        record.push(transaction_id.clone());
        record.extend(payload.values.iter().map(|value| value.to_string()));
        record.extend(transaction.values.iter().map(|value| value.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|text| !text.is_empty())
}

fn year_feature(year: i32) -> f32 {
    (year - 2000) as f32 / 50.0
}

fn text_len(value: Option<&str>, scale: f32) -> f32 {
    value.map_or(0.0, |text| text.chars().count() as f32 / scale)
}

fn optional_hash(value: Option<&str>) -> f32 {
    match value {
        Some(text) if !text.is_empty() => hash_unit(text),
        _ => 0.0,
    }
}

fn numeric_scaled(value: Option<&str>) -> f32 {
    value
        .and_then(|text| text.trim().parse::<f64>().ok())
        .map_or(0.0, |number| (number / 10_000.0) as f32)
}

// Only the leading six characters, and only when they are all digits.
fn iban_digits_prefix(iban: Option<&str>) -> f32 {
    let Some(iban) = iban else {
        return 0.0;
    };
    let prefix: String = iban.chars().take(6).collect();
    if prefix.len() == 6 && prefix.chars().all(|ch| ch.is_ascii_digit()) {
        prefix.parse::<f32>().map_or(0.0, |value| value / 1_000_000.0)
    } else {
        0.0
    }
}

fn hour_of(timestamp: &str) -> Option<u32> {
    timestamp
        .parse::<NaiveDateTime>()
        .ok()
        .map(|value| value.hour())
}
