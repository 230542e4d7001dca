mod client;
mod config;
mod derive;
mod error;
mod features;
mod generator;
mod logging;
mod models;
mod reconcile;
mod reference;
mod store;
mod submit;
mod util;

use clap::{Args, Parser, Subcommand};
use client::ApiClient;
use config::{DeriverConfig, SessionConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use derive::IdealTransactionDeriver;
use error::{Entity, PaygenError, Result};
use features::{write_feature_csv, FeatureEncoder, StandardEncoder};
use generator::{GeneratorOptions, PayloadGenerator, PaymentRequest, RandomRequest};
use models::OperationType;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reconcile::{reconcile_records, IssueLevel, ReconcileReport};
use reference::{DictionarySource, ReferenceData, Snapshot};
use serde::Serialize;
use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use store::{SubmissionStore, DEFAULT_STORE_PATH};
use submit::{run_batch, write_outcomes, BatchPlan, PayloadPlan};

const APP_NAME: &str = "taxpay-sim";

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(about = "Budget tax-payment payload generator and ideal-transaction deriver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Snapshot(SnapshotArgs),
    Generate(GenerateArgs),
    Random(RandomArgs),
    Submit(SubmitArgs),
    Derive(DeriveArgs),
    Encode(EncodeArgs),
    Reconcile(ReconcileArgs),
}

#[derive(Args)]
struct SourceArgs {
    #[arg(long, env = "TAXPAY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    #[arg(long, env = "TAXPAY_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, default_value_t = false)]
    insecure: bool,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[arg(long, default_value = "INDIVIDUAL_ENTREPRENEUR")]
    operation_type: String,
    /// Read dictionaries from a saved snapshot instead of the live service.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Parser)]
struct SnapshotArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, default_value = "data/reference/snapshot.json")]
    output: PathBuf,
}

#[derive(Parser)]
struct GenerateArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    kbk: u64,
    #[arg(long)]
    knp: String,
    #[arg(long)]
    amount: f64,
    #[arg(long, default_value = "")]
    purpose: String,
    /// Calendar period used when the KBK has no quarterly periods. Defaults to today.
    #[arg(long)]
    period: Option<String>,
    #[arg(long)]
    iban: Option<String>,
    #[arg(long)]
    ugd: Option<String>,
    #[arg(long, default_value_t = false)]
    fix_period: bool,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Parser)]
struct RandomArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, default_value_t = 1)]
    count: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    kbk: Option<u64>,
    #[arg(long)]
    iban: Option<String>,
    #[arg(long)]
    ugd: Option<String>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Parser)]
struct SubmitArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, default_value_t = 10)]
    iterations: usize,
    #[arg(long, default_value_t = 3)]
    max_attempts: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = "data/output/batch_results.csv")]
    results: PathBuf,
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,
    #[arg(long)]
    kbk: Option<u64>,
    #[arg(long, requires = "kbk")]
    knp: Option<String>,
    #[arg(long, default_value_t = 1000.0)]
    amount: f64,
    #[arg(long, default_value = "")]
    purpose: String,
    #[arg(long)]
    period: Option<String>,
    #[arg(long, default_value_t = false)]
    fix_period: bool,
    #[arg(long)]
    iban: Option<String>,
    #[arg(long)]
    ugd: Option<String>,
}

#[derive(Parser)]
struct DeriveArgs {
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    labels: LabelArgs,
}

#[derive(Parser)]
struct EncodeArgs {
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,
    #[arg(long, default_value = "data/output/features.csv")]
    output: PathBuf,
    #[command(flatten)]
    labels: LabelArgs,
}

#[derive(Parser)]
struct ReconcileArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    labels: LabelArgs,
}

#[derive(Args)]
struct LabelArgs {
    #[arg(long)]
    commission: Option<f64>,
    #[arg(long)]
    iban_credit: Option<String>,
}

impl LabelArgs {
    fn deriver(&self) -> IdealTransactionDeriver {
        let mut config = DeriverConfig::default();
        if let Some(commission) = self.commission {
            config.commission = commission;
        }
        if let Some(iban_credit) = &self.iban_credit {
            config.iban_credit = iban_credit.clone();
        }
        IdealTransactionDeriver::new(config)
    }
}

impl SourceArgs {
    fn operation_type(&self) -> OperationType {
        OperationType::from_tag(self.operation_type.trim())
    }

    fn client(&self) -> Result<ApiClient> {
        let token = self
            .token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                PaygenError::InvalidRequest(
                    "a bearer token is required (--token or TAXPAY_TOKEN)".to_string(),
                )
            })?;
        let mut config = SessionConfig::new(&self.base_url, token);
        config.operation_type = self.operation_type();
        config.accept_invalid_certs = self.insecure;
        config.timeout = Duration::from_secs(self.timeout_secs);
        ApiClient::new(config)
    }

    fn dictionaries(&self) -> Result<Box<dyn DictionarySource>> {
        match &self.snapshot {
            Some(path) => {
                let snapshot = Snapshot::load(path)?;
                emit_info_line(&format!(
                    "Using snapshot {} captured {}",
                    path.display(),
                    snapshot.captured_at
                ));
                Ok(Box::new(snapshot))
            }
            None => Ok(Box::new(self.client()?)),
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init_logging(APP_NAME)
        .map_err(|err| PaygenError::Io(std::io::Error::other(err)))?;
    let cli = Cli::parse();
    match cli.command {
        Command::Snapshot(args) => run_snapshot(args),
        Command::Generate(args) => run_generate(args),
        Command::Random(args) => run_random(args),
        Command::Submit(args) => run_submit(args),
        Command::Derive(args) => run_derive(args),
        Command::Encode(args) => run_encode(args),
        Command::Reconcile(args) => run_reconcile(args),
    }
}

fn run_snapshot(args: SnapshotArgs) -> Result<()> {
    let client = args.source.client()?;
    let start = Instant::now();
    log::info!(
        "Capturing {} dictionaries from {}",
        client.config().operation_type,
        client.config().base_url
    );
    let snapshot = Snapshot::capture(&client, client.config().operation_type.clone())?;
    snapshot.save(&args.output)?;
    emit_info_line(&format!(
        "Snapshot written to {} ({} ms)",
        args.output.display(),
        start.elapsed().as_millis()
    ));
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let source = args.source.dictionaries()?;
    let reference = ReferenceData::load(source.as_ref(), args.source.operation_type())?;
    let seed = args.seed.unwrap_or_else(random_seed);
    let options = GeneratorOptions::default();
    let period = args
        .period
        .clone()
        .unwrap_or_else(|| options.reference_date.format("%Y-%m-%d").to_string());
    let iban = pick_iban(args.iban.as_deref(), &reference)?;

    let mut payloads = PayloadGenerator::new(
        &reference,
        source.as_ref(),
        ChaCha8Rng::seed_from_u64(seed),
        options,
    )?;
    let payload = payloads.generate_payload(&PaymentRequest {
        iban,
        kbk_code: args.kbk,
        knp_code: args.knp,
        amount: args.amount,
        purpose: args.purpose,
        period,
        fix_period: args.fix_period,
        ugd_code: args.ugd,
    })?;

    log::info!("Generated {} (seed {})", payload.transaction_id, seed);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_random(args: RandomArgs) -> Result<()> {
    let source = args.source.dictionaries()?;
    let reference = ReferenceData::load(source.as_ref(), args.source.operation_type())?;
    let seed = args.seed.unwrap_or_else(random_seed);

    let mut payloads = PayloadGenerator::new(
        &reference,
        source.as_ref(),
        ChaCha8Rng::seed_from_u64(seed),
        GeneratorOptions::default(),
    )?;
    let request = RandomRequest {
        iban: args.iban,
        kbk_code: args.kbk,
        ugd_code: args.ugd,
    };
    let start = Instant::now();
    let generated = (0..args.count)
        .map(|_| payloads.generate_random(&request))
        .collect::<Result<Vec<_>>>()?;

    emit_info_line(&format!(
        "Generated {} random payload(s), seed {}, {} ms",
        generated.len(),
        seed,
        start.elapsed().as_millis()
    ));
    write_json(args.output.as_deref(), &generated)
}

fn run_submit(args: SubmitArgs) -> Result<()> {
    let client = args.source.client()?;
    let source = args.source.dictionaries()?;
    let reference = ReferenceData::load(source.as_ref(), args.source.operation_type())?;
    let seed = args.seed.unwrap_or_else(random_seed);
    let options = GeneratorOptions::default();

    let payload_plan = match (args.kbk, args.knp.clone()) {
        (Some(kbk_code), Some(knp_code)) => PayloadPlan::Directed(PaymentRequest {
            iban: pick_iban(args.iban.as_deref(), &reference)?,
            kbk_code,
            knp_code,
            amount: args.amount,
            purpose: args.purpose.clone(),
            period: args
                .period
                .clone()
                .unwrap_or_else(|| options.reference_date.format("%Y-%m-%d").to_string()),
            fix_period: args.fix_period,
            ugd_code: args.ugd.clone(),
        }),
        (kbk_code, _) => PayloadPlan::Random(RandomRequest {
            iban: args.iban.clone(),
            kbk_code,
            ugd_code: args.ugd.clone(),
        }),
    };
    let plan = BatchPlan {
        iterations: args.iterations,
        max_attempts: args.max_attempts,
        currency: DeriverConfig::default().currency,
        payloads: payload_plan,
    };

    let mut payloads = PayloadGenerator::new(
        &reference,
        source.as_ref(),
        ChaCha8Rng::seed_from_u64(seed),
        options,
    )?;
    let store = SubmissionStore::new(&args.store);
    emit_info_line(&format!(
        "Submit: iterations={} max_attempts={} seed={} store={}",
        plan.iterations,
        plan.max_attempts,
        seed,
        store.path().display()
    ));

    let start = Instant::now();
    let report = run_batch(&mut payloads, &client, &store, &plan)?;
    write_outcomes(&args.results, &report.outcomes)?;

    emit_info_line(&format!(
        "Submitted: stored={} failed_iterations={} attempts={} commission_failures={}",
        report.stored_count(),
        report.failed_iterations(),
        report.attempt_count(),
        report.commission_failures()
    ));
    emit_info_line(&format!(
        "Results written to {} ({} ms)",
        args.results.display(),
        start.elapsed().as_millis()
    ));
    Ok(())
}

fn run_derive(args: DeriveArgs) -> Result<()> {
    let records = SubmissionStore::new(&args.store).load()?;
    let deriver = args.labels.deriver();
    let derived = records
        .iter()
        .map(|record| deriver.derive_record(record))
        .collect::<Result<Vec<_>>>()?;

    emit_info_line(&format!(
        "Derived {} ideal transaction(s) from {}",
        derived.len(),
        args.store.display()
    ));
    write_json(args.output.as_deref(), &derived)
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let records = SubmissionStore::new(&args.store).load()?;
    let deriver = args.labels.deriver();
    let encoder = StandardEncoder;

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let ideal = deriver.derive_record(record)?;
        rows.push((
            record.payload.transaction_id.clone(),
            encoder.encode_payload(&record.payload),
            encoder.encode_transaction(&ideal),
        ));
    }
    write_feature_csv(&args.output, &rows)?;

    emit_info_line(&format!(
        "Encoded {} record(s) to {}",
        rows.len(),
        args.output.display()
    ));
    Ok(())
}

fn run_reconcile(args: ReconcileArgs) -> Result<()> {
    let client = args.source.client()?;
    let records = SubmissionStore::new(&args.store).load()?;
    let report = reconcile_records(&records, &args.labels.deriver(), &client)?;

    emit_info_line(&format!(
        "Reconcile: records={} found={} missing={} accuracy={:.3}",
        report.total_records,
        report.matched_records,
        report.missing.len(),
        report.accuracy()
    ));
    emit_info_line(&format!(
        "Reconcile issues: errors={} warnings={}",
        report.error_count(),
        report.warning_count()
    ));
    emit_field_summary("error", &report, IssueLevel::Error);
    emit_field_summary("warning", &report, IssueLevel::Warning);

    if let Some(output) = &args.output {
        write_csv(output, &report.mismatches)?;
        emit_info_line(&format!("Mismatches written to {}", output.display()));
    }
    Ok(())
}

fn emit_field_summary(label: &str, report: &ReconcileReport, level: IssueLevel) {
    let items = report.field_summary(level);
    let max_items = 5usize;
    for (field, count) in items.iter().take(max_items) {
        emit_info_line(&format!("Reconcile {}s: {} = {}", label, field, count));
    }
    if items.len() > max_items {
        emit_info_line(&format!(
            "Reconcile {}s: {} additional fields not shown",
            label,
            items.len() - max_items
        ));
    }
}

fn pick_iban(requested: Option<&str>, reference: &ReferenceData) -> Result<String> {
    match requested {
        Some(iban) => reference
            .accounts()
            .iter()
            .find(|account| account.iban == iban)
            .map(|account| account.iban.clone())
            .ok_or_else(|| PaygenError::not_found(Entity::Account, iban)),
        None => reference
            .accounts()
            .first()
            .map(|account| account.iban.clone())
            .ok_or_else(|| PaygenError::DataUnavailable("no eligible debit accounts".to_string())),
    }
}

fn random_seed() -> u64 {
    let mut rng = rand::rngs::OsRng;
    rng.gen()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_json<T: Serialize>(output: Option<&Path>, value: &T) -> Result<()> {
    match output {
        Some(path) => {
            ensure_parent(path)?;
            let file = File::create(path)?;
            serde_json::to_writer_pretty(BufWriter::new(file), value)?;
            emit_info_line(&format!("JSON output: {}", path.display()));
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn write_csv<T: Serialize>(output: &Path, records: &[T]) -> Result<()> {
    ensure_parent(output)?;
    let mut writer = csv::Writer::from_path(output)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn emit_info_line(message: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{}", message);
    } else {
        eprintln!("{message}");
    }
}
