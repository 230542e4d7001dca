use crate::error::{Entity, PaygenError, Result};
use crate::models::{Kbk, Knp, PaymentPayload, PeriodChoice, Ugd};
use crate::reference::{fetch_periods, DictionarySource, ReferenceData};
use crate::util::{generate_transaction_id, round_amount};

use chrono::{Duration, Local, NaiveDate};
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub reference_date: NaiveDate,
    pub amount_min: f64,
    pub amount_max: f64,
    pub calendar_lookback_days: i64,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            reference_date: Local::now().date_naive(),
            amount_min: 100.0,
            amount_max: 10_000.0,
            calendar_lookback_days: 365,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub iban: String,
    pub kbk_code: u64,
    pub knp_code: String,
    pub amount: f64,
    pub purpose: String,
    pub period: String,
    pub fix_period: bool,
    pub ugd_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RandomRequest {
    pub iban: Option<String>,
    pub kbk_code: Option<u64>,
    pub ugd_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodPolicy {
    First,
    Uniform,
}

pub struct PayloadGenerator<'a, R: Rng> {
    reference: &'a ReferenceData,
    source: &'a dyn DictionarySource,
    rng: R,
    options: GeneratorOptions,
}

impl<'a, R: Rng> PayloadGenerator<'a, R> {
    pub fn new(
        reference: &'a ReferenceData,
        source: &'a dyn DictionarySource,
        rng: R,
        options: GeneratorOptions,
    ) -> Result<Self> {
        if reference.accounts().is_empty() {
            return Err(PaygenError::DataUnavailable(
                "no eligible debit accounts".to_string(),
            ));
        }
        if reference.kbk_list().is_empty() {
            return Err(PaygenError::DataUnavailable(
                "KBK dictionary is empty".to_string(),
            ));
        }
        validate_options(&options)?;

        Ok(Self {
            reference,
            source,
            rng,
            options,
        })
    }

    pub fn generate_payload(&mut self, request: &PaymentRequest) -> Result<PaymentPayload> {
        if request.iban.trim().is_empty() {
            return Err(PaygenError::InvalidRequest("debit IBAN is required".to_string()));
        }
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(PaygenError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        let reference = self.reference;
        let kbk = reference
            .find_kbk(request.kbk_code)
            .ok_or_else(|| PaygenError::not_found(Entity::Kbk, request.kbk_code))?;
        let knp = kbk
            .find_knp(&request.knp_code)
            .ok_or_else(|| PaygenError::not_found(Entity::Knp, &request.knp_code))?;

        let policy = if request.fix_period {
            PeriodPolicy::First
        } else {
            PeriodPolicy::Uniform
        };
        let period = self
            .resolve_quarter(kbk, knp, policy)?
            .unwrap_or_else(|| PeriodChoice::Calendar(request.period.clone()));
        let bin = self.resolve_bin(kbk, request.ugd_code.as_deref())?;

        let payload = self.build_payload(
            request.iban.clone(),
            kbk,
            knp,
            round_amount(request.amount),
            request.purpose.clone(),
            period,
            bin,
        );
        log::debug!(
            "Generated directed payload {} (KBK {}, KNP {})",
            payload.transaction_id,
            kbk.code,
            knp.knp_code
        );
        Ok(payload)
    }

    pub fn generate_random_payload(&mut self, iban: Option<&str>) -> Result<PaymentPayload> {
        self.generate_random(&RandomRequest {
            iban: iban.map(str::to_string),
            ..RandomRequest::default()
        })
    }

    pub fn generate_random(&mut self, request: &RandomRequest) -> Result<PaymentPayload> {
        let reference = self.reference;
        let iban = match request.iban.as_deref() {
            Some(iban) if !iban.trim().is_empty() => iban.to_string(),
            _ => reference
                .accounts()
                .choose(&mut self.rng)
                .map(|account| account.iban.clone())
                .ok_or_else(|| {
                    PaygenError::DataUnavailable("no eligible debit accounts".to_string())
                })?,
        };

        let kbk = match request.kbk_code {
            Some(code) => reference
                .find_kbk(code)
                .ok_or_else(|| PaygenError::not_found(Entity::Kbk, code))?,
            None => reference
                .kbk_list()
                .choose(&mut self.rng)
                .ok_or_else(|| PaygenError::DataUnavailable("KBK dictionary is empty".to_string()))?,
        };
        let knp = kbk.knp_list.choose(&mut self.rng).ok_or_else(|| {
            PaygenError::DataUnavailable(format!("KBK {} has no KNP entries", kbk.code))
        })?;

        let amount = round_amount(
            self.rng
                .gen_range(self.options.amount_min..=self.options.amount_max),
        );
        let suffix: u32 = self.rng.gen_range(1000..=9999);
        let purpose = format!("{}_{}", knp.knp_name, suffix);

        let period = match self.resolve_quarter(kbk, knp, PeriodPolicy::Uniform)? {
            Some(period) => period,
            None => PeriodChoice::Calendar(self.random_calendar_period()),
        };
        let bin = self.resolve_bin(kbk, request.ugd_code.as_deref())?;

        let payload = self.build_payload(iban, kbk, knp, amount, purpose, period, bin);
        log::debug!(
            "Generated random payload {} (KBK {}, KNP {}, amount {})",
            payload.transaction_id,
            kbk.code,
            knp.knp_code,
            payload.amount
        );
        Ok(payload)
    }

    // `None` means the KBK/KNP pair takes a free-form calendar period.
    fn resolve_quarter(
        &mut self,
        kbk: &Kbk,
        knp: &Knp,
        policy: PeriodPolicy,
    ) -> Result<Option<PeriodChoice>> {
        if !kbk.is_period_based() {
            return Ok(None);
        }

        let periods = fetch_periods(
            self.source,
            self.reference.operation_type(),
            kbk.code,
            &knp.knp_code,
        )?;
        let selected = match policy {
            PeriodPolicy::First => periods.first(),
            PeriodPolicy::Uniform => periods.choose(&mut self.rng),
        };

        Ok(selected.and_then(|entry| {
            entry.quarter.map(|quarter| PeriodChoice::Quarterly {
                year: entry.year,
                quarter,
            })
        }))
    }

    fn resolve_bin(&mut self, kbk: &Kbk, ugd_code: Option<&str>) -> Result<Option<String>> {
        if !kbk.ugd_loading_required {
            return Ok(None);
        }
        let ugd = self.resolve_ugd(ugd_code)?;
        Ok(Some(ugd.bin.clone()))
    }

    fn resolve_ugd(&mut self, ugd_code: Option<&str>) -> Result<&'a Ugd> {
        let reference = self.reference;
        match ugd_code {
            Some(code) => reference
                .find_ugd(code)
                .ok_or_else(|| PaygenError::not_found(Entity::Ugd, code)),
            None => reference.ugd_list().choose(&mut self.rng).ok_or_else(|| {
                PaygenError::DataUnavailable("UGD dictionary is empty".to_string())
            }),
        }
    }

    fn random_calendar_period(&mut self) -> String {
        let days_back = self
            .rng
            .gen_range(1..=self.options.calendar_lookback_days.max(1));
        (self.options.reference_date - Duration::days(days_back))
            .format("%Y-%m-%d")
            .to_string()
    }

    #[allow(clippy::too_many_arguments)]
    fn build_payload(
        &mut self,
        iban: String,
        kbk: &Kbk,
        knp: &Knp,
        amount: f64,
        purpose: String,
        period: PeriodChoice,
        bin: Option<String>,
    ) -> PaymentPayload {
        let mut payload = PaymentPayload {
            transaction_id: generate_transaction_id(&mut self.rng),
            iban_debit: iban,
            amount,
            kbk: Some(kbk.snapshot()),
            knp: knp.knp_code.clone(),
            purpose: Some(purpose),
            taxes_payment_operation_type: Some(self.reference.operation_type().clone()),
            period: None,
            quarter: None,
            year: None,
            bin,
            ugd: None,
        };
        payload.set_period(period);
        payload
    }
}

fn validate_options(options: &GeneratorOptions) -> Result<()> {
    if !options.amount_min.is_finite() || options.amount_min <= 0.0 {
        return Err(PaygenError::InvalidRequest(
            "amount_min must be positive".to_string(),
        ));
    }
    if !options.amount_max.is_finite() || options.amount_max < options.amount_min {
        return Err(PaygenError::InvalidRequest(
            "amount_max must be at least amount_min".to_string(),
        ));
    }
    if options.calendar_lookback_days < 1 {
        return Err(PaygenError::InvalidRequest(
            "calendar_lookback_days must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationType, Quarter};
    use crate::reference::fixtures;
    use crate::reference::Snapshot;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn setup() -> (Snapshot, ReferenceData) {
        let snapshot = fixtures::snapshot();
        let reference =
            ReferenceData::load(&snapshot, OperationType::IndividualEntrepreneur).unwrap();
        (snapshot, reference)
    }

    fn options() -> GeneratorOptions {
        GeneratorOptions {
            reference_date: NaiveDate::from_ymd_opt(2025, 4, 3).unwrap(),
            ..GeneratorOptions::default()
        }
    }

    fn generator<'a>(
        snapshot: &'a Snapshot,
        reference: &'a ReferenceData,
        seed: u64,
    ) -> PayloadGenerator<'a, ChaCha8Rng> {
        PayloadGenerator::new(reference, snapshot, ChaCha8Rng::seed_from_u64(seed), options())
            .unwrap()
    }

    fn request(kbk_code: u64, knp_code: &str) -> PaymentRequest {
        PaymentRequest {
            iban: "KZ92886A220120705719".to_string(),
            kbk_code,
            knp_code: knp_code.to_string(),
            amount: 1000.456,
            purpose: "Main".to_string(),
            period: "2025-03-01".to_string(),
            fix_period: false,
            ugd_code: None,
        }
    }

    fn assert_exclusive_period(payload: &PaymentPayload) {
        let quarterly = payload.year.is_some() && payload.quarter.is_some();
        let calendar = payload.period.is_some();
        assert!(quarterly != calendar, "payload {:?}", payload);
        assert_eq!(payload.year.is_some(), payload.quarter.is_some());
    }

    #[test]
    fn fixed_period_takes_first_entry() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 1);
        let mut req = request(105308, "911");
        req.fix_period = true;
        for _ in 0..20 {
            let payload = payloads.generate_payload(&req).unwrap();
            assert_eq!(payload.year, Some(2025));
            assert_eq!(payload.quarter, Some(Quarter::First));
            assert!(payload.period.is_none());
        }
    }

    #[test]
    fn unfixed_period_picks_from_list() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 2);
        let req = request(105308, "911");
        let allowed = [
            (2025, Quarter::First),
            (2024, Quarter::Fourth),
            (2024, Quarter::Third),
        ];
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let payload = payloads.generate_payload(&req).unwrap();
            assert_exclusive_period(&payload);
            let pair = (payload.year.unwrap(), payload.quarter.unwrap());
            assert!(allowed.contains(&pair));
            seen.insert(pair);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn period_based_kbk_without_periods_uses_free_form() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 3);
        let payload = payloads.generate_payload(&request(101202, "911")).unwrap();
        assert_eq!(payload.period.as_deref(), Some("2025-03-01"));
        assert!(payload.year.is_none());
        assert!(payload.quarter.is_none());
    }

    #[test]
    fn calendar_kbk_uses_free_form_without_ugd() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 4);
        let payload = payloads.generate_payload(&request(205101, "913")).unwrap();
        assert_eq!(payload.period.as_deref(), Some("2025-03-01"));
        assert!(payload.bin.is_none());
        assert!(payload.ugd.is_none());
        assert_eq!(payload.amount, 1000.46);
        assert_eq!(payload.purpose.as_deref(), Some("Main"));
        assert_eq!(
            payload.taxes_payment_operation_type,
            Some(OperationType::IndividualEntrepreneur)
        );
        assert!(payload.transaction_id.starts_with("APP_INDNTRTAX_"));
        let kbk = payload.kbk.unwrap();
        assert_eq!(kbk.code, 205101);
        assert!(!kbk.ugd_loading_required);
    }

    #[test]
    fn calendar_kbk_ignores_its_period_list() {
        let (snapshot, reference) = setup();
        let op = OperationType::IndividualEntrepreneur;
        assert_eq!(fetch_periods(&snapshot, &op, 205101, "911").unwrap().len(), 1);

        let mut payloads = generator(&snapshot, &reference, 12);
        let mut req = request(205101, "911");
        req.fix_period = true;
        let payload = payloads.generate_payload(&req).unwrap();
        assert_eq!(payload.period.as_deref(), Some("2025-03-01"));
        assert!(payload.year.is_none());
        assert!(payload.quarter.is_none());

        let random = RandomRequest {
            kbk_code: Some(205101),
            ..RandomRequest::default()
        };
        for _ in 0..200 {
            let payload = payloads.generate_random(&random).unwrap();
            assert!(payload.period.is_some());
            assert!(payload.year.is_none());
            assert!(payload.quarter.is_none());
        }
    }

    #[test]
    fn supplied_ugd_code_attaches_its_bin() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 5);
        let mut req = request(105308, "912");
        req.ugd_code = Some("121312".to_string());
        let payload = payloads.generate_payload(&req).unwrap();
        assert_eq!(payload.bin.as_deref(), Some("980540000971"));
        assert!(payload.ugd.is_none());
    }

    #[test]
    fn random_ugd_bin_comes_from_dictionary() {
        let (snapshot, reference) = setup();
        let bins: HashSet<&str> = reference.ugd_list().iter().map(|u| u.bin.as_str()).collect();
        let mut payloads = generator(&snapshot, &reference, 6);
        for _ in 0..50 {
            let payload = payloads.generate_payload(&request(105308, "911")).unwrap();
            assert!(bins.contains(payload.bin.as_deref().unwrap()));
        }
    }

    #[test]
    fn unknown_codes_report_entity_and_code() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 7);

        let err = payloads.generate_payload(&request(999999, "911")).unwrap_err();
        assert!(matches!(
            err,
            PaygenError::NotFound { entity: Entity::Kbk, ref code } if code == "999999"
        ));

        let err = payloads.generate_payload(&request(105308, "000")).unwrap_err();
        assert!(matches!(
            err,
            PaygenError::NotFound { entity: Entity::Knp, ref code } if code == "000"
        ));

        let mut req = request(105308, "911");
        req.ugd_code = Some("555555".to_string());
        let err = payloads.generate_payload(&req).unwrap_err();
        assert!(matches!(
            err,
            PaygenError::NotFound { entity: Entity::Ugd, ref code } if code == "555555"
        ));
    }

    #[test]
    fn ugd_required_with_empty_dictionary_is_unavailable() {
        let mut snapshot = fixtures::snapshot();
        snapshot.ugd_list.clear();
        let reference =
            ReferenceData::load(&snapshot, OperationType::IndividualEntrepreneur).unwrap();
        let mut payloads = generator(&snapshot, &reference, 8);
        let err = payloads.generate_payload(&request(105308, "911")).unwrap_err();
        assert!(matches!(err, PaygenError::DataUnavailable(_)));
        assert!(payloads.generate_payload(&request(205101, "911")).is_ok());
    }

    #[test]
    fn rejects_non_positive_amount() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 9);
        let mut req = request(205101, "911");
        req.amount = 0.0;
        assert!(matches!(
            payloads.generate_payload(&req),
            Err(PaygenError::InvalidRequest(_))
        ));
        req.amount = f64::NAN;
        assert!(matches!(
            payloads.generate_payload(&req),
            Err(PaygenError::InvalidRequest(_))
        ));
    }

    #[test]
    fn random_ugd_kbk_always_carries_bin() {
        let (snapshot, reference) = setup();
        let bins: HashSet<&str> = reference.ugd_list().iter().map(|u| u.bin.as_str()).collect();
        let mut payloads = generator(&snapshot, &reference, 10);
        let req = RandomRequest {
            kbk_code: Some(105308),
            ..RandomRequest::default()
        };
        for _ in 0..1000 {
            let payload = payloads.generate_random(&req).unwrap();
            assert!(bins.contains(payload.bin.as_deref().unwrap()));
            assert_exclusive_period(&payload);
            assert!(payload.year.is_some());
        }
    }

    #[test]
    fn random_calendar_kbk_never_carries_bin() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 11);
        let req = RandomRequest {
            kbk_code: Some(205101),
            ..RandomRequest::default()
        };
        let earliest = NaiveDate::from_ymd_opt(2024, 4, 3).unwrap();
        let latest = NaiveDate::from_ymd_opt(2025, 4, 2).unwrap();
        for _ in 0..1000 {
            let payload = payloads.generate_random(&req).unwrap();
            assert!(payload.bin.is_none());
            assert!(payload.ugd.is_none());
            assert_exclusive_period(&payload);
            let period = NaiveDate::parse_from_str(payload.period.as_deref().unwrap(), "%Y-%m-%d")
                .unwrap();
            assert!(period >= earliest && period <= latest, "{period}");
        }
    }

    #[test]
    fn random_values_stay_in_range() {
        let (snapshot, reference) = setup();
        let ibans: HashSet<&str> = reference.accounts().iter().map(|a| a.iban.as_str()).collect();
        let mut payloads = generator(&snapshot, &reference, 12);
        let mut ids = HashSet::new();
        for _ in 0..500 {
            let payload = payloads.generate_random_payload(None).unwrap();
            assert!(ibans.contains(payload.iban_debit.as_str()));
            assert!((100.0..=10_000.0).contains(&payload.amount));
            assert_eq!(round_amount(payload.amount), payload.amount);
            assert_exclusive_period(&payload);

            let kbk = payload.kbk.as_ref().unwrap();
            assert_eq!(payload.bin.is_some(), kbk.ugd_loading_required);

            let purpose = payload.purpose.as_deref().unwrap();
            let (name, suffix) = purpose.rsplit_once('_').unwrap();
            assert_eq!(name, format!("Purpose {}", payload.knp));
            let suffix: u32 = suffix.parse().unwrap();
            assert!((1000..=9999).contains(&suffix));

            assert!(ids.insert(payload.transaction_id.clone()));
        }
    }

    #[test]
    fn random_respects_supplied_iban() {
        let (snapshot, reference) = setup();
        let mut payloads = generator(&snapshot, &reference, 13);
        let payload = payloads.generate_random_payload(Some("KZ123456789")).unwrap();
        assert_eq!(payload.iban_debit, "KZ123456789");
    }

    #[test]
    fn random_generation_is_reproducible_per_seed() {
        let (snapshot, reference) = setup();
        let mut a = generator(&snapshot, &reference, 42);
        let mut b = generator(&snapshot, &reference, 42);
        for _ in 0..25 {
            assert_eq!(
                a.generate_random_payload(None).unwrap(),
                b.generate_random_payload(None).unwrap()
            );
        }
    }

    #[test]
    fn rejects_inverted_amount_range() {
        let (snapshot, reference) = setup();
        let options = GeneratorOptions {
            amount_min: 500.0,
            amount_max: 100.0,
            ..options()
        };
        let result =
            PayloadGenerator::new(&reference, &snapshot, ChaCha8Rng::seed_from_u64(1), options);
        assert!(matches!(result, Err(PaygenError::InvalidRequest(_))));
    }
}
