use crate::derive::IdealTransactionDeriver;
use crate::error::Result;
use crate::models::{SubmissionRecord, TransactionDetail, TransactionSummary};

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub trait LedgerSource {
    fn find_transaction(
        &self,
        ibans: &[String],
        transaction_id: &str,
    ) -> Result<Option<TransactionSummary>>;

    fn transaction_detail(&self, summary: &TransactionSummary) -> Result<Option<TransactionDetail>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warning,
}

// Placeholders in the derived record, or values the ledger assigns on its own.
const APPROXIMATE_FIELDS: [&str; 5] = ["commission", "ibanCredit", "id", "createdDate", "modifiedDate"];

fn level_for(field: &str) -> IssueLevel {
    if APPROXIMATE_FIELDS.contains(&field) {
        IssueLevel::Warning
    } else {
        IssueLevel::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMismatch {
    pub transaction_id: String,
    pub field: String,
    pub level: IssueLevel,
    pub expected: String,
    pub actual: String,
}

/// Field-by-field comparison of a derived record against the ledger copy. Amounts match within half a tiyn.
pub fn reconcile(ideal: &TransactionDetail, actual: &TransactionDetail) -> Vec<FieldMismatch> {
    let (Ok(Value::Object(expected)), Ok(Value::Object(found))) =
        (serde_json::to_value(ideal), serde_json::to_value(actual))
    else {
        return Vec::new();
    };

    expected
        .iter()
        .filter_map(|(field, expected_value)| {
            let actual_value = found.get(field).unwrap_or(&Value::Null);
            if values_match(expected_value, actual_value) {
                return None;
            }
            Some(FieldMismatch {
                transaction_id: ideal.transaction_id.clone(),
                field: field.clone(),
                level: level_for(field),
                expected: render(expected_value),
                actual: render(actual_value),
            })
        })
        .collect()
}

fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected.as_f64(), actual.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() < 0.005,
        _ => expected == actual,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub total_records: usize,
    pub matched_records: usize,
    pub missing: Vec<String>,
    pub exact_fields_checked: usize,
    pub mismatches: Vec<FieldMismatch>,
}

impl ReconcileReport {
    pub fn error_count(&self) -> usize {
        self.mismatches
            .iter()
            .filter(|mismatch| mismatch.level == IssueLevel::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.mismatches
            .iter()
            .filter(|mismatch| mismatch.level == IssueLevel::Warning)
            .count()
    }

    /// Share of exact (non-approximate) fields that matched across all found records.
    pub fn accuracy(&self) -> f64 {
        if self.exact_fields_checked == 0 {
            return 0.0;
        }
        let matched = self.exact_fields_checked.saturating_sub(self.error_count());
        matched as f64 / self.exact_fields_checked as f64
    }

    pub fn field_summary(&self, level: IssueLevel) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for mismatch in self.mismatches.iter().filter(|m| m.level == level) {
            *counts.entry(mismatch.field.as_str()).or_insert(0) += 1;
        }
        let mut items: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(field, count)| (field.to_string(), count))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items
    }
}

pub fn reconcile_records<L: LedgerSource + ?Sized>(
    records: &[SubmissionRecord],
    deriver: &IdealTransactionDeriver,
    ledger: &L,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        total_records: records.len(),
        ..ReconcileReport::default()
    };

    for record in records {
        let ideal = deriver.derive_record(record)?;
        let ibans = vec![record.payload.iban_debit.clone()];
        let detail = match ledger.find_transaction(&ibans, &ideal.transaction_id)? {
            Some(summary) => ledger.transaction_detail(&summary)?,
            None => None,
        };
        let Some(actual) = detail else {
            log::warn!("Ledger has no transaction {}", ideal.transaction_id);
            report.missing.push(ideal.transaction_id.clone());
            continue;
        };

        let exact_fields = serde_json::to_value(&ideal)?
            .as_object()
            .map_or(0, |fields| {
                fields
                    .keys()
                    .filter(|field| level_for(field) == IssueLevel::Error)
                    .count()
            });
        report.exact_fields_checked += exact_fields;
        report.matched_records += 1;
        report.mismatches.extend(reconcile(&ideal, &actual));
    }

    log::info!(
        "Reconciled {} of {} records: errors={} warnings={} missing={}",
        report.matched_records,
        report.total_records,
        report.error_count(),
        report.warning_count(),
        report.missing.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KbkRef, OperationType, PaymentPayload, Quarter, UgdRef};
    use chrono::NaiveDateTime;

    fn record(id: &str) -> SubmissionRecord {
        SubmissionRecord {
            timestamp: "2025-04-03T19:38:21.798734".to_string(),
            payload: PaymentPayload {
                transaction_id: id.to_string(),
                iban_debit: "KZ92886A220120705719".to_string(),
                amount: 5740.25,
                kbk: Some(KbkRef {
                    name: "KBK 105308".to_string(),
                    code: 105308,
                    employee_loading_required: false,
                    ugd_loading_required: true,
                }),
                knp: "911".to_string(),
                purpose: Some("Purpose 911_9498".to_string()),
                taxes_payment_operation_type: Some(OperationType::IndividualEntrepreneur),
                period: None,
                quarter: Some(Quarter::First),
                year: Some(2025),
                bin: None,
                ugd: Some(UgdRef {
                    bin: Some("980840003491".to_string()),
                    name: Some("UGD 180308".to_string()),
                    code: Some("180308".to_string()),
                }),
            },
        }
    }

    struct FakeLedger {
        details: HashMap<String, TransactionDetail>,
    }

    impl LedgerSource for FakeLedger {
        fn find_transaction(
            &self,
            _ibans: &[String],
            transaction_id: &str,
        ) -> Result<Option<TransactionSummary>> {
            Ok(self.details.get(transaction_id).map(|detail| TransactionSummary {
                id: detail.id.clone(),
                transaction_id: detail.transaction_id.clone(),
                transaction_type: detail.transaction_type.clone(),
                ..TransactionSummary::default()
            }))
        }

        fn transaction_detail(
            &self,
            summary: &TransactionSummary,
        ) -> Result<Option<TransactionDetail>> {
            Ok(self.details.get(&summary.transaction_id).cloned())
        }
    }

    fn ideal(id: &str) -> TransactionDetail {
        let ts: NaiveDateTime = "2025-04-03T19:38:21.798734".parse().unwrap();
        IdealTransactionDeriver::default().derive(&record(id).payload, &ts)
    }

    #[test]
    fn identical_records_have_no_mismatches() {
        assert!(reconcile(&ideal("T1"), &ideal("T1")).is_empty());
    }

    #[test]
    fn placeholder_fields_are_warnings() {
        let expected = ideal("T1");
        let mut actual = expected.clone();
        actual.commission = 0.0;
        actual.iban_credit = Some("KZ000000000000000001".to_string());
        actual.id = "ledger-assigned".to_string();
        actual.created_date = "2025-04-03T19:38:22".to_string();

        let mismatches = reconcile(&expected, &actual);
        assert_eq!(mismatches.len(), 4);
        assert!(mismatches
            .iter()
            .all(|mismatch| mismatch.level == IssueLevel::Warning));
    }

    #[test]
    fn content_differences_are_errors() {
        let expected = ideal("T1");
        let mut actual = expected.clone();
        actual.period = Some("2025-06-30".to_string());
        actual.counterparty = None;
        actual.amount = 5740.251;

        let mismatches = reconcile(&expected, &actual);
        let fields: Vec<&str> = mismatches.iter().map(|m| m.field.as_str()).collect();
        assert_eq!(mismatches.len(), 2, "{fields:?}");
        assert!(fields.contains(&"period"));
        assert!(fields.contains(&"counterparty"));
        let counterparty = mismatches
            .iter()
            .find(|m| m.field == "counterparty")
            .unwrap();
        assert_eq!(counterparty.level, IssueLevel::Error);
        assert_eq!(counterparty.expected, "UGD 180308");
        assert_eq!(counterparty.actual, "");
    }

    #[test]
    fn report_counts_missing_and_accuracy() {
        let mut found = ideal("T1");
        found.commission = 0.0;
        found.knp_code = "912".to_string();
        let ledger = FakeLedger {
            details: HashMap::from([("T1".to_string(), found)]),
        };
        let records = vec![record("T1"), record("T2")];

        let report =
            reconcile_records(&records, &IdealTransactionDeriver::default(), &ledger).unwrap();
        assert_eq!(report.total_records, 2);
        assert_eq!(report.matched_records, 1);
        assert_eq!(report.missing, vec!["T2".to_string()]);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(
            report.field_summary(IssueLevel::Error),
            vec![("knpCode".to_string(), 1)]
        );

        let exact = report.exact_fields_checked as f64;
        assert!(exact > 0.0);
        assert!((report.accuracy() - (exact - 1.0) / exact).abs() < 1e-9);
    }

    #[test]
    fn empty_report_has_zero_accuracy() {
        let report = ReconcileReport::default();
        assert_eq!(report.accuracy(), 0.0);
        assert_eq!(report.error_count(), 0);
    }
}
