use crate::{
    error::PrivSearchError,
    params::{MAX_SLOT_BITS, URLS_PLAINTEXT_MODULUS},
    pir::PirParams,
    scoring::check_inner_product_bound,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Deployment configuration, loadable from TOML. Missing keys take their default.
///
/// ```toml
/// embedding_dim = 192
/// slot_bits = 5
/// embeddings_hint_size = 500
/// urls_hint_size = 100
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub embedding_dim: u64,
    /// Signed bit width of one embedding slot.
    pub slot_bits: u32,
    pub embeddings_hint_size: u64,
    pub urls_hint_size: u64,
    /// The embeddings database uses plaintext modulus `2^embeddings_record_bits`.
    pub embeddings_record_bits: u32,
    pub compress_urls: bool,
    pub embeddings_lwe_dimension: usize,
    pub urls_lwe_dimension: usize,
    pub hint_lwe_dimension: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            embedding_dim: 192,
            slot_bits: 5,
            embeddings_hint_size: 500,
            urls_hint_size: 100,
            embeddings_record_bits: 17,
            compress_urls: true,
            embeddings_lwe_dimension: 2048,
            urls_lwe_dimension: 1774,
            hint_lwe_dimension: 1024,
        }
    }
}

impl SearchConfig {
    pub fn from_toml_str(text: &str) -> Result<SearchConfig, PrivSearchError> {
        let config: SearchConfig = toml::from_str(text).map_err(|e| PrivSearchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SearchConfig, PrivSearchError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String, PrivSearchError> {
        toml::to_string(self).map_err(|e| PrivSearchError::Serialization(e.to_string()))
    }

    /// Checks that every field is usable, and that embedding inner products fit the embeddings plaintext space.
    pub fn validate(&self) -> Result<(), PrivSearchError> {
        if self.embedding_dim == 0 {
            return Err(PrivSearchError::InvalidConfig(String::from("embedding dimension must be non-zero")));
        }
        if self.slot_bits == 0 || self.slot_bits > MAX_SLOT_BITS {
            return Err(PrivSearchError::UnsupportedSlotBitWidth(self.slot_bits));
        }
        if self.embeddings_hint_size == 0 || self.urls_hint_size == 0 {
            return Err(PrivSearchError::InvalidConfig(String::from("hint sizes must be non-zero")));
        }
        if self.embeddings_record_bits == 0 || self.embeddings_record_bits >= u64::BITS {
            return Err(PrivSearchError::InvalidConfig(format!(
                "embeddings record width of {} bits is not supported",
                self.embeddings_record_bits
            )));
        }
        if self.embeddings_lwe_dimension == 0 || self.urls_lwe_dimension == 0 || self.hint_lwe_dimension == 0 {
            return Err(PrivSearchError::InvalidConfig(String::from("LWE dimensions must be non-zero")));
        }

        check_inner_product_bound(self.embeddings_plaintext_modulus(), self.slot_bits, self.embedding_dim)
    }

    pub fn embeddings_plaintext_modulus(&self) -> u64 {
        1u64 << self.embeddings_record_bits.min(u64::BITS - 1)
    }

    pub fn embeddings_pir_params(&self) -> PirParams {
        PirParams {
            plaintext_modulus: self.embeddings_plaintext_modulus(),
            lwe_dimension: self.embeddings_lwe_dimension,
            hint_lwe_dimension: self.hint_lwe_dimension,
        }
    }

    pub fn urls_pir_params(&self) -> PirParams {
        PirParams {
            plaintext_modulus: URLS_PLAINTEXT_MODULUS,
            lwe_dimension: self.urls_lwe_dimension,
            hint_lwe_dimension: self.hint_lwe_dimension,
        }
    }
}
