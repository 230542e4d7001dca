use crate::error::{PaygenError, Result};
use crate::models::{Account, Kbk, OperationType, PeriodDictionary, PeriodEntry, Ugd};
use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub trait DictionarySource {
    fn accounts(&self) -> Result<Vec<Account>>;

    fn kbk_list(&self, operation_type: &OperationType) -> Result<Vec<Kbk>>;

    fn ugd_list(&self) -> Result<Vec<Ugd>>;

    /// `None` when the service has no period dictionary for the pair.
    fn payment_periods(
        &self,
        operation_type: &OperationType,
        kbk_code: u64,
        knp_code: &str,
    ) -> Result<Option<PeriodDictionary>>;
}

#[derive(Debug, Clone)]
pub struct ReferenceData {
    operation_type: OperationType,
    accounts: Vec<Account>,
    kbk_list: Vec<Kbk>,
    ugd_list: Vec<Ugd>,
}

impl ReferenceData {
    pub fn load<S: DictionarySource + ?Sized>(
        source: &S,
        operation_type: OperationType,
    ) -> Result<Self> {
        let accounts = source.accounts()?;
        let kbk_list = source.kbk_list(&operation_type)?;
        let ugd_list = source.ugd_list()?;
        let reference = Self::from_parts(operation_type, accounts, kbk_list, ugd_list)?;
        log::info!(
            "Loaded reference data for {}: accounts={} kbk={} ugd={}",
            reference.operation_type,
            reference.accounts.len(),
            reference.kbk_list.len(),
            reference.ugd_list.len()
        );
        Ok(reference)
    }

    pub fn from_parts(
        operation_type: OperationType,
        accounts: Vec<Account>,
        kbk_list: Vec<Kbk>,
        ugd_list: Vec<Ugd>,
    ) -> Result<Self> {
        let total_accounts = accounts.len();
        let accounts: Vec<Account> = accounts
            .into_iter()
            .filter(|account| account.is_eligible())
            .collect();
        if accounts.is_empty() {
            return Err(PaygenError::DataUnavailable(format!(
                "no open, unblocked debit accounts among {} account(s)",
                total_accounts
            )));
        }
        if kbk_list.is_empty() {
            return Err(PaygenError::DataUnavailable(format!(
                "KBK dictionary is empty for {}",
                operation_type
            )));
        }
        if ugd_list.is_empty() {
            log::warn!("UGD dictionary is empty; KBKs requiring a UGD cannot be generated");
        }

        Ok(Self {
            operation_type,
            accounts,
            kbk_list,
            ugd_list,
        })
    }

    pub fn operation_type(&self) -> &OperationType {
        &self.operation_type
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn kbk_list(&self) -> &[Kbk] {
        &self.kbk_list
    }

    pub fn ugd_list(&self) -> &[Ugd] {
        &self.ugd_list
    }

    pub fn find_kbk(&self, code: u64) -> Option<&Kbk> {
        self.kbk_list.iter().find(|kbk| kbk.code == code)
    }

    pub fn find_ugd(&self, code: &str) -> Option<&Ugd> {
        self.ugd_list.iter().find(|ugd| ugd.code == code)
    }
}

pub fn fetch_periods<S: DictionarySource + ?Sized>(
    source: &S,
    operation_type: &OperationType,
    kbk_code: u64,
    knp_code: &str,
) -> Result<Vec<PeriodEntry>> {
    let dictionary = match source.payment_periods(operation_type, kbk_code, knp_code)? {
        Some(dictionary) if dictionary.period_type.is_some() => dictionary,
        _ => return Ok(Vec::new()),
    };

    let total = dictionary.periods.len();
    let periods: Vec<PeriodEntry> = dictionary
        .periods
        .into_iter()
        .filter(|entry| entry.quarter.is_some())
        .collect();
    if periods.len() < total {
        log::debug!(
            "Dropped {} period entries without quarter for KBK {} / KNP {}",
            total - periods.len(),
            kbk_code,
            knp_code
        );
    }
    Ok(periods)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub kbk_code: u64,
    pub knp_code: String,
    pub dictionary: Option<PeriodDictionary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub operation_type: OperationType,
    pub captured_at: String,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub kbk_list: Vec<Kbk>,
    #[serde(default)]
    pub ugd_list: Vec<Ugd>,
    #[serde(default)]
    pub periods: Vec<PeriodRecord>,
}

impl Snapshot {
    pub fn capture<S: DictionarySource + ?Sized>(
        source: &S,
        operation_type: OperationType,
    ) -> Result<Self> {
        let accounts = source.accounts()?;
        let kbk_list = source.kbk_list(&operation_type)?;
        let ugd_list = source.ugd_list()?;

        let mut periods = Vec::new();
        for kbk in kbk_list.iter().filter(|kbk| kbk.is_period_based()) {
            for knp in &kbk.knp_list {
                let dictionary = source.payment_periods(&operation_type, kbk.code, &knp.knp_code)?;
                periods.push(PeriodRecord {
                    kbk_code: kbk.code,
                    knp_code: knp.knp_code.clone(),
                    dictionary,
                });
            }
        }
        log::info!(
            "Captured snapshot: accounts={} kbk={} ugd={} period_pairs={}",
            accounts.len(),
            kbk_list.len(),
            ugd_list.len(),
            periods.len()
        );

        Ok(Self {
            operation_type,
            captured_at: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            accounts,
            kbk_list,
            ugd_list,
            periods,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let snapshot = serde_json::from_reader(BufReader::new(file))?;
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

impl DictionarySource for Snapshot {
    fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    fn kbk_list(&self, operation_type: &OperationType) -> Result<Vec<Kbk>> {
        if *operation_type != self.operation_type {
            log::warn!(
                "Snapshot holds {} dictionaries, {} requested",
                self.operation_type,
                operation_type
            );
            return Ok(Vec::new());
        }
        Ok(self.kbk_list.clone())
    }

    fn ugd_list(&self) -> Result<Vec<Ugd>> {
        Ok(self.ugd_list.clone())
    }

    fn payment_periods(
        &self,
        operation_type: &OperationType,
        kbk_code: u64,
        knp_code: &str,
    ) -> Result<Option<PeriodDictionary>> {
        if *operation_type != self.operation_type {
            return Ok(None);
        }
        Ok(self
            .periods
            .iter()
            .find(|record| record.kbk_code == kbk_code && record.knp_code == knp_code)
            .and_then(|record| record.dictionary.clone()))
    }
}
