use chrono::NaiveDateTime;
use rand::Rng;
use uuid::Uuid;

pub const TRANSACTION_ID_PREFIX: &str = "APP_INDNTRTAX";

pub fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

pub fn generate_transaction_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}_{}", TRANSACTION_ID_PREFIX, random_uuid(rng))
}

pub fn round_amount(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn format_amount(value: f64) -> String {
    format!("{:.2}", value)
}

// Matches ISO-8601 as written by the submission log: microseconds, omitted when zero.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    if value.and_utc().timestamp_subsec_micros() == 0 {
        format_timestamp_seconds(value)
    } else {
        value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

pub fn format_timestamp_seconds(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

// FNV-1a keeps feature hashes stable between runs and platforms.
pub fn stable_hash(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn hash_unit(input: &str) -> f32 {
    (stable_hash(input) % 10_000) as f32 / 10_000.0
}
