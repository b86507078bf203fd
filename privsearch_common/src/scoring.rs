use crate::{branch_opt_util, error::PrivSearchError, params::MAX_SLOT_BITS};

/// Saturates `v` into the range of a signed `bits`-bit integer.
#[inline(always)]
pub fn clamp(v: i64, bits: u32) -> i8 {
    let bits = bits.clamp(1, MAX_SLOT_BITS);
    let hi = (1i64 << (bits - 1)) - 1;
    let lo = -(1i64 << (bits - 1));
    v.clamp(lo, hi) as i8
}

pub fn clamp_embedding(values: &[i64], bits: u32) -> Vec<i8> {
    values.iter().map(|&v| clamp(v, bits)).collect()
}

/// Largest possible magnitude of an inner product between two `dim`-dimensional vectors of signed `slot_bits`-bit
/// values, doubled: `2 · 2^(2·slot_bits - 2) · dim`.
pub fn inner_product_bound(slot_bits: u32, dim: u64) -> u64 {
    let max_square = 1u64.checked_shl((2 * slot_bits).saturating_sub(2)).unwrap_or(u64::MAX);
    2u64.saturating_mul(max_square).saturating_mul(dim)
}

/// Fails unless the plaintext modulus is large enough for inner products never to wrap around.
pub fn check_inner_product_bound(plaintext_modulus: u64, slot_bits: u32, dim: u64) -> Result<(), PrivSearchError> {
    if branch_opt_util::unlikely(slot_bits == 0 || slot_bits > MAX_SLOT_BITS) {
        return Err(PrivSearchError::UnsupportedSlotBitWidth(slot_bits));
    }

    let bound = inner_product_bound(slot_bits, dim);
    if branch_opt_util::unlikely(plaintext_modulus <= bound) {
        return Err(PrivSearchError::InnerProductMayWrap {
            modulus: plaintext_modulus,
            bound,
        });
    }

    Ok(())
}

/// Maps a value modulo `p` to its centred representative in `(-p/2, p/2]`. Exact for inner products, as long as the
/// modulus passed [`check_inner_product_bound`].
#[inline(always)]
pub fn smooth(v: u64, p: u64) -> i64 {
    let v = v % p;
    if v > p / 2 { v as i64 - p as i64 } else { v as i64 }
}

pub fn smooth_results(values: &[u64], p: u64) -> Vec<i64> {
    values.iter().map(|&v| smooth(v, p)).collect()
}

/// Indices of `scores`, ordered by decreasing score. Equal scores keep their relative order.
pub fn sort_by_scores(scores: &[i64]) -> Vec<usize> {
    let mut indices = (0..scores.len()).collect::<Vec<usize>>();
    indices.sort_by(|&a, &b| scores[b].cmp(&scores[a]));
    indices
}

/// Ranked `(document, score)` candidates. Enumeration stops at the first zero score in ranked order, nothing past
/// it is relevant.
pub fn ranked_candidates(scores: &[i64]) -> Vec<(usize, i64)> {
    sort_by_scores(scores)
        .into_iter()
        .map(|doc| (doc, scores[doc]))
        .take_while(|&(_, score)| score != 0)
        .collect()
}
