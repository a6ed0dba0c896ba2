// src/id_generator.rs
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::types::IdFormat;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("static regex")
});
static BRACED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{[0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12}\}$").expect("static regex")
});
static HEX64_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("static regex"));

const MAX_ATTEMPTS: usize = 8;

impl IdFormat {
    /// Recognises the shape of an existing value. A 64-hex value reports
    /// `Hex64`; the two hex formats are indistinguishable on disk.
    pub fn detect(value: &str) -> Option<IdFormat> {
        if UUID_RE.is_match(value) {
            Some(IdFormat::Uuid)
        } else if BRACED_RE.is_match(value) {
            Some(IdFormat::BracedUpperUuid)
        } else if HEX64_RE.is_match(value) {
            Some(IdFormat::Hex64)
        } else {
            None
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            IdFormat::Uuid => UUID_RE.is_match(value),
            IdFormat::BracedUpperUuid => BRACED_RE.is_match(value),
            IdFormat::Hex64 | IdFormat::Sha256Hex => HEX64_RE.is_match(value),
        }
    }
}

// OS-seeded CSPRNG.
pub fn generate(format: IdFormat) -> String {
    match format {
        IdFormat::Uuid => Uuid::new_v4().to_string(),
        IdFormat::BracedUpperUuid => format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase()),
        IdFormat::Hex64 => {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
        IdFormat::Sha256Hex => hex::encode(Sha256::digest(Uuid::new_v4().as_bytes())),
    }
}

/// Generates a value that differs from everything in `avoid` (the old values
/// seen in this run), retrying on collision. `None` means the random source
/// kept colliding, which only a broken RNG does.
pub fn generate_distinct(format: IdFormat, avoid: &HashSet<String>) -> Option<String> {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = generate(format);
        if !avoid.contains(&candidate) {
            return Some(candidate);
        }
        warn!("Generated identifier collided with an existing value; retrying");
    }
    None
}

/// Format for replacing `old`: the old value's own shape when recognisable,
/// otherwise the registry hint.
pub fn format_for(old: &str, hint: IdFormat) -> IdFormat {
    match IdFormat::detect(old) {
        Some(IdFormat::Hex64) if hint == IdFormat::Sha256Hex => IdFormat::Sha256Hex,
        Some(detected) => detected,
        None => hint,
    }
}
