//! Row fingerprinting

use crate::dataset::Dataset;
use crate::error::{ReconError, Result};
use crate::normalize::{CanonicalValue, Normalizer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Bytes kept from the digest (128 bits)
pub const FINGERPRINT_LEN: usize = 16;

/// Digest used to fingerprint rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Blake3 => write!(f, "blake3"),
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "blake3" => Ok(DigestAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            other => Err(ReconError::invalid_input(format!(
                "Unsupported digest algorithm: {other}"
            ))),
        }
    }
}

/// Fixed-length digest of a row's canonical values
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowFingerprint([u8; FINGERPRINT_LEN]);

impl RowFingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First 8 hex characters, enough to tell fingerprints apart in a report
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for RowFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RowFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowFingerprint({})", self.to_hex())
    }
}

enum RowHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

impl RowHasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Blake3 => RowHasher::Blake3(Box::new(blake3::Hasher::new())),
            DigestAlgorithm::Sha256 => RowHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            RowHasher::Blake3(h) => {
                h.update(bytes);
            }
            RowHasher::Sha256(h) => h.update(bytes),
        }
    }

    fn finalize(self) -> RowFingerprint {
        let mut out = [0u8; FINGERPRINT_LEN];
        match self {
            RowHasher::Blake3(h) => {
                out.copy_from_slice(&h.finalize().as_bytes()[..FINGERPRINT_LEN])
            }
            RowHasher::Sha256(h) => out.copy_from_slice(&h.finalize()[..FINGERPRINT_LEN]),
        }
        RowFingerprint(out)
    }
}

/// Fingerprint of one row plus the number of null-equivalent cells seen while building it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowHash {
    pub fingerprint: RowFingerprint,
    pub null_cells: usize,
}

/// Computes row fingerprints from normalized cell values
#[derive(Debug, Clone, Copy, Default)]
pub struct HashComputer {
    algorithm: DigestAlgorithm,
    normalizer: Normalizer,
}

impl HashComputer {
    pub fn new(algorithm: DigestAlgorithm, normalizer: Normalizer) -> Self {
        Self {
            algorithm,
            normalizer,
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Digest an ordered list of canonical strings
    ///
    /// Each value is length-prefixed, so `["a|b", "c"]` and `["a", "b|c"]` never collide
    /// regardless of what characters the values contain.
    pub fn digest<'a>(&self, values: impl IntoIterator<Item = &'a str>) -> RowFingerprint {
        let mut hasher = RowHasher::new(self.algorithm);
        for value in values {
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        hasher.finalize()
    }

    /// Canonical values of one row over the given column positions
    pub fn canonical_row<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        row: usize,
        columns: &[usize],
    ) -> Vec<CanonicalValue> {
        columns
            .iter()
            .map(|&col| self.normalizer.normalize(dataset.cell(row, col)))
            .collect()
    }

    /// Fingerprint one row over the given column positions
    pub fn hash_row<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        row: usize,
        columns: &[usize],
    ) -> RowHash {
        let canonical = self.canonical_row(dataset, row, columns);
        let null_cells = canonical.iter().filter(|c| c.is_null_equivalent()).count();
        let fingerprint = self.digest(canonical.iter().map(|c| c.as_str()));

        #[cfg(debug_assertions)]
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Row {row} canonical values {:?} -> {fingerprint}", canonical);
        }

        RowHash {
            fingerprint,
            null_cells,
        }
    }
}
