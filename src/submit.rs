use crate::error::{PaygenError, Result};
use crate::generator::{PayloadGenerator, PaymentRequest, RandomRequest};
use crate::models::PaymentPayload;
use crate::store::SubmissionStore;
use crate::util::format_amount;

use chrono::Local;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::fs::create_dir_all;
use std::path::Path;

const RESPONSE_COLUMN_LIMIT: usize = 300;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRequest {
    pub transaction_id: String,
    pub transaction_amount: f64,
    pub currency: String,
    pub urgent: bool,
    pub future_value_date: bool,
}

impl CommissionRequest {
    pub fn for_payload(payload: &PaymentPayload, currency: &str) -> Self {
        Self {
            transaction_id: payload.transaction_id.clone(),
            transaction_amount: payload.amount,
            currency: currency.to_string(),
            urgent: false,
            future_value_date: false,
        }
    }
}

pub trait PaymentApi {
    fn calculate_commission(&self, request: &CommissionRequest) -> Result<Value>;

    fn submit_payment(&self, payload: &PaymentPayload) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub enum PayloadPlan {
    Random(RandomRequest),
    Directed(PaymentRequest),
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub iterations: usize,
    pub max_attempts: usize,
    pub currency: String,
    pub payloads: PayloadPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub iteration: usize,
    pub attempt: usize,
    pub transaction_id: String,
    pub amount: String,
    pub purpose: String,
    pub period: String,
    pub commission_ok: bool,
    pub commission_response: String,
    pub payment_ok: bool,
    pub payment_response: String,
    pub stored: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub iterations: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn stored_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.stored).count()
    }

    pub fn failed_iterations(&self) -> usize {
        self.iterations - self.stored_count()
    }

    pub fn attempt_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn commission_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.commission_ok)
            .count()
    }
}

/// Runs iterations sequentially. Every attempt generates a new payload, so retries never reuse a transaction id.
pub fn run_batch<R: Rng, A: PaymentApi + ?Sized>(
    generator: &mut PayloadGenerator<'_, R>,
    api: &A,
    store: &SubmissionStore,
    plan: &BatchPlan,
) -> Result<BatchReport> {
    if plan.max_attempts == 0 {
        return Err(PaygenError::InvalidRequest(
            "max attempts must be at least 1".to_string(),
        ));
    }

    let mut report = BatchReport {
        iterations: plan.iterations,
        outcomes: Vec::new(),
    };
    for iteration in 1..=plan.iterations {
        for attempt in 1..=plan.max_attempts {
            let payload = match &plan.payloads {
                PayloadPlan::Random(request) => generator.generate_random(request)?,
                PayloadPlan::Directed(request) => generator.generate_payload(request)?,
            };
            let outcome = submit_once(api, store, &payload, &plan.currency, iteration, attempt)?;
            let stored = outcome.stored;
            report.outcomes.push(outcome);
            if stored {
                break;
            }
            log::warn!(
                "Iteration {} attempt {}/{} rejected for {}",
                iteration,
                attempt,
                plan.max_attempts,
                payload.transaction_id
            );
        }
    }

    log::info!(
        "Batch finished: iterations={} stored={} attempts={} commission_failures={}",
        report.iterations,
        report.stored_count(),
        report.attempt_count(),
        report.commission_failures()
    );
    Ok(report)
}

fn submit_once<A: PaymentApi + ?Sized>(
    api: &A,
    store: &SubmissionStore,
    payload: &PaymentPayload,
    currency: &str,
    iteration: usize,
    attempt: usize,
) -> Result<BatchOutcome> {
    // A failed commission quote does not stop the payment attempt.
    let commission = api.calculate_commission(&CommissionRequest::for_payload(payload, currency));
    if let Err(err) = &commission {
        log::warn!("Commission for {} failed: {}", payload.transaction_id, err);
    }
    let payment = api.submit_payment(payload);

    let stored = if payment.is_ok() {
        store.append(payload, &Local::now().naive_local())?;
        true
    } else {
        false
    };

    Ok(BatchOutcome {
        iteration,
        attempt,
        transaction_id: payload.transaction_id.clone(),
        amount: format_amount(payload.amount),
        purpose: payload.purpose.clone().unwrap_or_default(),
        period: describe_period(payload),
        commission_ok: commission.is_ok(),
        commission_response: response_text(&commission),
        payment_ok: payment.is_ok(),
        payment_response: response_text(&payment),
        stored,
    })
}

fn describe_period(payload: &PaymentPayload) -> String {
    match (&payload.period, payload.year, payload.quarter) {
        (Some(period), _, _) => period.clone(),
        (None, Some(year), Some(quarter)) => format!("{} {}", year, quarter.as_str()),
        _ => String::new(),
    }
}

fn response_text(response: &Result<Value>) -> String {
    let text = match response {
        Ok(value) => value.to_string(),
        Err(err) => err.to_string(),
    };
    match text.char_indices().nth(RESPONSE_COLUMN_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

pub fn write_outcomes(path: &Path, outcomes: &[BatchOutcome]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    for outcome in outcomes {
        writer.serialize(outcome)?;
    }
    writer.flush()?;
    Ok(())
}
