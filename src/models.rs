use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const ACCOUNT_STATUS_OPEN: &str = "OPEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub iban: String,
    #[serde(default)]
    pub account_status: String,
    #[serde(default)]
    pub fully_blocked: Option<bool>,
    #[serde(default)]
    pub available_balance: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl Account {
    // A missing blocked flag counts as blocked.
    pub fn is_eligible(&self) -> bool {
        self.account_status == ACCOUNT_STATUS_OPEN && self.fully_blocked == Some(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountList {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Knp {
    #[serde(deserialize_with = "lenient::text")]
    pub knp_code: String,
    #[serde(default)]
    pub knp_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kbk {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "lenient::number")]
    pub code: u64,
    #[serde(default)]
    pub employee_loading_required: bool,
    #[serde(default)]
    pub ugd_loading_required: bool,
    #[serde(default)]
    pub knp_list: Vec<Knp>,
}

impl Kbk {
    pub fn is_period_based(&self) -> bool {
        is_period_based_code(self.code)
    }

    pub fn find_knp(&self, knp_code: &str) -> Option<&Knp> {
        self.knp_list.iter().find(|knp| knp.knp_code == knp_code)
    }

    pub fn snapshot(&self) -> KbkRef {
        KbkRef {
            name: self.name.clone(),
            code: self.code,
            employee_loading_required: self.employee_loading_required,
            ugd_loading_required: self.ugd_loading_required,
        }
    }
}

pub fn is_period_based_code(code: u64) -> bool {
    code.to_string().starts_with('1')
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KbkRef {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "lenient::number")]
    pub code: u64,
    #[serde(default)]
    pub employee_loading_required: bool,
    #[serde(default)]
    pub ugd_loading_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ugd {
    #[serde(deserialize_with = "lenient::text")]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text_or_empty")]
    pub bin: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UgdRef {
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub bin: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quarter {
    First,
    Second,
    Third,
    Fourth,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [
        Quarter::First,
        Quarter::Second,
        Quarter::Third,
        Quarter::Fourth,
    ];

    pub fn number(self) -> u8 {
        match self {
            Quarter::First => 1,
            Quarter::Second => 2,
            Quarter::Third => 3,
            Quarter::Fourth => 4,
        }
    }

    pub fn end_month_day(self) -> &'static str {
        match self {
            Quarter::First => "03-31",
            Quarter::Second => "06-30",
            Quarter::Third => "09-30",
            Quarter::Fourth => "12-31",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quarter::First => "FIRST",
            Quarter::Second => "SECOND",
            Quarter::Third => "THIRD",
            Quarter::Fourth => "FOURTH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodEntry {
    pub year: i32,
    #[serde(default)]
    pub quarter: Option<Quarter>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub year_half: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodDictionary {
    #[serde(default)]
    pub period_type: Option<String>,
    #[serde(default)]
    pub periods: Vec<PeriodEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    IndividualEntrepreneur,
    Corporate,
    Employee,
    Other(String),
}

impl OperationType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "INDIVIDUAL_ENTREPRENEUR" => OperationType::IndividualEntrepreneur,
            "CORPORATE" => OperationType::Corporate,
            "EMPLOYEE" => OperationType::Employee,
            other => OperationType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationType::IndividualEntrepreneur => "INDIVIDUAL_ENTREPRENEUR",
            OperationType::Corporate => "CORPORATE",
            OperationType::Employee => "EMPLOYEE",
            OperationType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(OperationType::from_tag(&tag))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeriodChoice {
    Calendar(String),
    Quarterly { year: i32, quarter: Quarter },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub transaction_id: String,
    pub iban_debit: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kbk: Option<KbkRef>,
    #[serde(deserialize_with = "lenient::text")]
    pub knp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxes_payment_operation_type: Option<OperationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<Quarter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::optional_text"
    )]
    pub bin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ugd: Option<UgdRef>,
}

impl PaymentPayload {
    pub fn set_period(&mut self, choice: PeriodChoice) {
        match choice {
            PeriodChoice::Calendar(period) => {
                self.period = Some(period);
                self.year = None;
                self.quarter = None;
            }
            PeriodChoice::Quarterly { year, quarter } => {
                self.period = None;
                self.year = Some(year);
                self.quarter = Some(quarter);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionDetail {
    #[serde(deserialize_with = "lenient::or_default")]
    pub transaction_type: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub id: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub transaction_id: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub created_date: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub modified_date: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub status: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub amount: f64,
    pub another_amount: Option<f64>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub currency: String,
    pub another_currency: Option<String>,
    #[serde(
        serialize_with = "whole_as_integer",
        deserialize_with = "lenient::or_default"
    )]
    pub commission: f64,
    pub counterparty: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub purpose: String,
    pub iban_debit: Option<String>,
    pub iban_credit: Option<String>,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub credit_identifier: Option<String>,
    pub exchange_direction: Option<String>,
    pub fact_sender_name: Option<String>,
    pub fact_sender_iin: Option<String>,
    pub error_message: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub knp: String,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub ugd_bin: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub kbk_name: String,
    #[serde(deserialize_with = "lenient::text_or_empty")]
    pub kbk_code: String,
    #[serde(deserialize_with = "lenient::text_or_empty")]
    pub knp_code: String,
    pub payment_half_year: Option<u8>,
    pub payment_year: Option<i32>,
    pub period: Option<String>,
    pub payment_quarter: Option<u8>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub employees: Vec<serde_json::Value>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub debit: bool,
}

/// Row of the payment-history search; `id` and `transactionType` address the detail endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionSummary {
    pub id: String,
    pub transaction_id: String,
    pub transaction_type: String,
    pub status: Option<String>,
    pub amount: Option<f64>,
    pub created_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub timestamp: String,
    pub payload: PaymentPayload,
}

impl SubmissionRecord {
    pub fn submitted_at(&self) -> Result<NaiveDateTime, chrono::ParseError> {
        self.timestamp.parse::<NaiveDateTime>()
    }
}

// Fees are quoted in whole tenge and written without a fraction, as the label pipeline expects.
fn whole_as_integer<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

// Dictionary services are inconsistent about emitting codes as strings or numbers.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCode {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    impl RawCode {
        fn into_text(self) -> String {
            match self {
                RawCode::Text(value) => value,
                RawCode::Unsigned(value) => value.to_string(),
                RawCode::Signed(value) => value.to_string(),
                RawCode::Float(value) => value.to_string(),
            }
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(RawCode::deserialize(deserializer)?.into_text())
    }

    pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    pub fn text_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(optional_text(deserializer)?.unwrap_or_default())
    }

    pub fn optional_text<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(Option::<RawCode>::deserialize(deserializer)?.map(RawCode::into_text))
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match RawCode::deserialize(deserializer)? {
            RawCode::Unsigned(value) => Ok(value),
            RawCode::Text(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| D::Error::custom(format!("invalid numeric code: {value}"))),
            RawCode::Signed(value) => Err(D::Error::custom(format!("negative code: {value}"))),
            RawCode::Float(value) => Err(D::Error::custom(format!("fractional code: {value}"))),
        }
    }
}
