//! Single-server LWE private information retrieval over a dense `rows x cols` database.
//!
//! The server-side database `D` is multiplied by a public matrix `A`, expanded from a seed, to produce the hint
//! `H = D·A`. A client query for column `j` is `q = A·s + e + Δ·u` where `u` is either the unit vector selecting `j`
//! or an arbitrary small weight vector. The answer `D·q` lets the client recover `D·u` modulo the plaintext modulus,
//! after removing `H·s`.
//!
//! `H` is never shipped to clients. Instead the client encrypts its fresh secret `s` under an outer LWE instance
//! over the double-width ring and lets the server multiply the encryption with `H`, split into half-width limbs so
//! that the outer noise stays small. This is the offline phase: it does not depend on the query and runs ahead of it.

use crate::{
    branch_opt_util,
    elem::{Elem, LweElem},
    error::PrivSearchError,
    matrix::Matrix,
    params::{HINT_MATRIX_DOMAIN, PUBLIC_MATRIX_DOMAIN, SEED_BYTE_LEN},
};
use serde::{Deserialize, Serialize};

/// Scheme parameters of one PIR database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PirParams {
    /// Power of two, strictly smaller than the ciphertext modulus.
    pub plaintext_modulus: u64,
    /// Dimension `n` of the online LWE secret.
    pub lwe_dimension: usize,
    /// Dimension `k` of the outer LWE secret, protecting the online secret during the offline phase.
    pub hint_lwe_dimension: usize,
}

impl PirParams {
    #[inline(always)]
    pub const fn plaintext_bits(&self) -> u32 {
        self.plaintext_modulus.trailing_zeros()
    }
}

/// Public description of a PIR database, everything a client needs besides the hint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbInfo {
    pub rows: usize,
    pub cols: usize,
    pub params: PirParams,
    pub seed: [u8; SEED_BYTE_LEN],
}

/// Server-side handle of a PIR database: the centred database matrix and its hint `H = D·A`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PirDatabase<E: LweElem> {
    info: DbInfo,
    db: Matrix<E>,
    hint: Matrix<E>,
}

/// Client hint, `G_lo = H_lo·B` and `G_hi = H_hi·B`, over the double-width ring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PirHint<E: LweElem> {
    g_lo: Matrix<E::Wide>,
    g_hi: Matrix<E::Wide>,
}

/// Hint-only server, derived from a database's hint. Answers offline-phase queries.
#[derive(Clone, Debug, PartialEq)]
pub struct HintServer<E: LweElem> {
    h_lo: Matrix<E::Wide>,
    h_hi: Matrix<E::Wide>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Query<E: Elem> {
    pub vec_q: Matrix<E>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Answer<E: Elem> {
    pub vec_a: Matrix<E>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct HintQuery<E: LweElem> {
    pub vec_c: Matrix<E::Wide>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct HintAnswer<E: LweElem> {
    pub vec_lo: Matrix<E::Wide>,
    pub vec_hi: Matrix<E::Wide>,
}

/// Validates the parameters for a database with `cols` columns, returning `log2(P)`.
///
/// Two noise conditions are checked. The online answer carries noise `D·e`, bounded by `cols · P/2`, which must
/// stay below `Δ/2`. The offline answer carries noise `H_limb·e'`, bounded by `n · 2^(BITS/2)`, which must stay below
/// `Δ'/2 = 2^(BITS-1)`.
fn check_params<E: LweElem>(params: &PirParams, cols: usize) -> Result<u32, PrivSearchError> {
    let p = params.plaintext_modulus;
    if branch_opt_util::unlikely(p < 2 || !p.is_power_of_two() || p.trailing_zeros() >= E::BITS) {
        return Err(PrivSearchError::InvalidPlaintextModulus(p));
    }
    if branch_opt_util::unlikely(params.lwe_dimension == 0 || params.hint_lwe_dimension == 0) {
        return Err(PrivSearchError::InvalidMatrixDimension);
    }

    let log_p = p.trailing_zeros();

    let half_delta = 1u128 << (E::BITS - log_p - 1);
    let online_noise = (cols as u128) * (p as u128 / 2);
    if branch_opt_util::unlikely(online_noise >= half_delta) {
        return Err(PrivSearchError::NoiseBudgetExceeded(format!(
            "{} columns at plaintext modulus {} accumulate noise {} >= {}",
            cols, p, online_noise, half_delta
        )));
    }

    let half_outer_delta = 1u128 << (E::BITS - 1);
    let offline_noise = (params.lwe_dimension as u128) << (E::BITS / 2);
    if branch_opt_util::unlikely(offline_noise >= half_outer_delta) {
        return Err(PrivSearchError::NoiseBudgetExceeded(format!(
            "LWE dimension {} accumulates offline noise {} >= {}",
            params.lwe_dimension, offline_noise, half_outer_delta
        )));
    }

    Ok(log_p)
}

/// Splits every element of `mat` into its low and high half-width limbs, lifted into the double-width ring.
fn split_limbs<E: LweElem>(mat: &Matrix<E>) -> (Matrix<E::Wide>, Matrix<E::Wide>) {
    let half = E::BITS / 2;
    (mat.map(|v| v.mask(half).widen()), mat.map(|v| v.shr(half).widen()))
}

/// Sets up a PIR database from row-major `values`, each below the plaintext modulus.
///
/// # Arguments
///
/// * `values` - `rows * cols` database records, in row-major order.
/// * `rows` - Number of database rows `L`.
/// * `cols` - Number of database columns `M`.
/// * `params` - Scheme parameters.
/// * `seed` - Seed from which the public matrices are expanded.
///
/// # Returns
///
/// * `Result<(PirDatabase<E>, PirHint<E>, DbInfo), PrivSearchError>` - The server-side database handle, the client hint
///   and the public database description, or an error if the parameters could not guarantee correct decryption.
pub fn setup<E: LweElem>(
    values: &[u64],
    rows: usize,
    cols: usize,
    params: &PirParams,
    seed: &[u8; SEED_BYTE_LEN],
) -> Result<(PirDatabase<E>, PirHint<E>, DbInfo), PrivSearchError> {
    let log_p = check_params::<E>(params, cols)?;

    if branch_opt_util::unlikely(rows == 0 || cols == 0) {
        return Err(PrivSearchError::InvalidMatrixDimension);
    }
    if branch_opt_util::unlikely(values.len() != rows * cols) {
        return Err(PrivSearchError::InvalidNumberOfElementsInMatrix);
    }

    let p = 1u64 << log_p;
    if let Some((index, &value)) = values.iter().enumerate().find(|&(_, &v)| v >= p) {
        return Err(PrivSearchError::ValueExceedsPlaintextModulus { index: index as u64, value });
    }

    let half_p = p / 2;
    let centred = values
        .iter()
        .map(|&v| if v > half_p { E::from_i64(v as i64 - p as i64) } else { E::from_u64(v) })
        .collect::<Vec<E>>();

    let db = Matrix::from_values(rows, cols, centred)?;
    let pub_mat_a = Matrix::<E>::generate_from_seed::<PUBLIC_MATRIX_DOMAIN>(cols, params.lwe_dimension, seed)?;
    let hint = (&db * &pub_mat_a)?;

    let hint_mat_b = Matrix::<E::Wide>::generate_from_seed::<HINT_MATRIX_DOMAIN>(params.lwe_dimension, params.hint_lwe_dimension, seed)?;
    let (h_lo, h_hi) = split_limbs(&hint);
    let client_hint = PirHint {
        g_lo: (&h_lo * &hint_mat_b)?,
        g_hi: (&h_hi * &hint_mat_b)?,
    };

    let info = DbInfo {
        rows,
        cols,
        params: *params,
        seed: *seed,
    };

    Ok((PirDatabase { info: info.clone(), db, hint }, client_hint, info))
}

impl<E: LweElem> PirDatabase<E> {
    pub fn info(&self) -> &DbInfo {
        &self.info
    }

    /// Computes `D·q`, yielding one answer element per database row.
    pub fn answer(&self, query: &Query<E>) -> Result<Answer<E>, PrivSearchError> {
        if branch_opt_util::unlikely(!query.vec_q.has_shape(1, self.info.cols)) {
            return Err(PrivSearchError::InvalidMessageLength {
                expected: self.info.cols as u64,
                found: query.vec_q.num_elems() as u64,
            });
        }

        Ok(Answer {
            vec_a: query.vec_q.row_vector_x_transposed_matrix(&self.db)?,
        })
    }

    /// Derives the hint-only server answering offline-phase queries.
    pub fn hint_server(&self) -> HintServer<E> {
        let (h_lo, h_hi) = split_limbs(&self.hint);
        HintServer { h_lo, h_hi }
    }
}

impl<E: LweElem> HintServer<E> {
    /// Multiplies both hint limbs with the client's encrypted secret.
    pub fn answer(&self, query: &HintQuery<E>) -> Result<HintAnswer<E>, PrivSearchError> {
        let lwe_dimension = self.h_lo.num_cols();
        if branch_opt_util::unlikely(!query.vec_c.has_shape(1, lwe_dimension)) {
            return Err(PrivSearchError::InvalidMessageLength {
                expected: lwe_dimension as u64,
                found: query.vec_c.num_elems() as u64,
            });
        }

        Ok(HintAnswer {
            vec_lo: query.vec_c.row_vector_x_transposed_matrix(&self.h_lo)?,
            vec_hi: query.vec_c.row_vector_x_transposed_matrix(&self.h_hi)?,
        })
    }
}

#[derive(Clone, Debug)]
struct PendingSecret<E: LweElem> {
    secret_s: Matrix<E>,
    secret_t: Matrix<E::Wide>,
}

#[derive(Clone, Debug)]
struct PreparedSecret<E: LweElem> {
    secret_s: Matrix<E>,
    hint_s: Matrix<E>,
}

/// Client side of one PIR database.
///
/// Every offline phase yields one fresh secret, which is consumed by exactly one online query. The client moves
/// through `hint_query → hint_recover → query/query_linear → recover` for each retrieval.
#[derive(Clone, Debug)]
pub struct PirClient<E: LweElem> {
    info: DbInfo,
    pub_mat_a: Matrix<E>,
    hint_mat_b: Matrix<E::Wide>,
    hint: PirHint<E>,
    pending: Option<PendingSecret<E>>,
    prepared: Option<PreparedSecret<E>>,
    in_flight: Option<Matrix<E>>,
}

impl<E: LweElem> PirClient<E> {
    /// Sets up a client from the public database description and the client hint, checking that they agree.
    pub fn new(info: &DbInfo, hint: PirHint<E>) -> Result<PirClient<E>, PrivSearchError> {
        check_params::<E>(&info.params, info.cols)?;

        let n = info.params.lwe_dimension;
        let k = info.params.hint_lwe_dimension;
        if branch_opt_util::unlikely(!(hint.g_lo.has_shape(info.rows, k) && hint.g_hi.has_shape(info.rows, k))) {
            return Err(PrivSearchError::InvalidHint);
        }

        let pub_mat_a = Matrix::<E>::generate_from_seed::<PUBLIC_MATRIX_DOMAIN>(info.cols, n, &info.seed)?;
        let hint_mat_b = Matrix::<E::Wide>::generate_from_seed::<HINT_MATRIX_DOMAIN>(n, k, &info.seed)?;

        Ok(PirClient {
            info: info.clone(),
            pub_mat_a,
            hint_mat_b,
            hint,
            pending: None,
            prepared: None,
            in_flight: None,
        })
    }

    pub fn info(&self) -> &DbInfo {
        &self.info
    }

    /// Samples a fresh secret `s` and encrypts it for the hint-only server, as `c = B·t + e' + Δ'·s`.
    /// Any previously pending or prepared secret is discarded.
    pub fn hint_query(&mut self) -> Result<HintQuery<E>, PrivSearchError> {
        let n = self.info.params.lwe_dimension;
        let k = self.info.params.hint_lwe_dimension;

        let secret_s = Matrix::<E>::sample_from_uniform_ternary_dist(1, n)?;
        let secret_t = Matrix::<E::Wide>::sample_from_uniform_ternary_dist(1, k)?;
        let error_e = Matrix::<E::Wide>::sample_from_uniform_ternary_dist(1, n)?;

        let outer_delta = <E::Wide as Elem>::ONE.shl(E::BITS);
        let scaled_s = secret_s.map(|v| v.widen().wrapping_mul(outer_delta));

        let vec_bt = secret_t.row_vector_x_transposed_matrix(&self.hint_mat_b)?;
        let vec_c = (&(&vec_bt + &error_e)? + &scaled_s)?;

        self.pending = Some(PendingSecret { secret_s, secret_t });
        self.prepared = None;

        Ok(HintQuery { vec_c })
    }

    /// Removes the outer encryption from the hint-only server's answer, recovering `H·s` for the pending secret.
    pub fn hint_recover(&mut self, answer: &HintAnswer<E>) -> Result<(), PrivSearchError> {
        let rows = self.info.rows;
        if branch_opt_util::unlikely(!(answer.vec_lo.has_shape(1, rows) && answer.vec_hi.has_shape(1, rows))) {
            return Err(PrivSearchError::InvalidMessageLength {
                expected: rows as u64,
                found: answer.vec_lo.num_elems().min(answer.vec_hi.num_elems()) as u64,
            });
        }

        let pending = self.pending.take().ok_or(PrivSearchError::NoPreprocessedSecret)?;

        let round_limb = |noisy: &Matrix<E::Wide>, g: &Matrix<E::Wide>| -> Result<Matrix<E>, PrivSearchError> {
            let mask = pending.secret_t.row_vector_x_transposed_matrix(g)?;
            let half_outer_delta = <E::Wide as Elem>::ONE.shl(E::BITS - 1);
            Ok((noisy - &mask)?.map(|v| E::narrow(v.wrapping_add(half_outer_delta).shr(E::BITS))))
        };

        let lo = round_limb(&answer.vec_lo, &self.hint.g_lo)?;
        let hi = round_limb(&answer.vec_hi, &self.hint.g_hi)?;
        let hint_s = (&lo + &hi.map(|v| v.shl(E::BITS / 2)))?;

        self.prepared = Some(PreparedSecret {
            secret_s: pending.secret_s,
            hint_s,
        });

        Ok(())
    }

    /// Whether an offline-phase secret is ready to be consumed by the next query.
    pub fn is_preprocessed(&self) -> bool {
        self.prepared.is_some()
    }

    /// Point query, retrieving the whole database column `col`.
    pub fn query(&mut self, col: usize) -> Result<Query<E>, PrivSearchError> {
        if branch_opt_util::unlikely(col >= self.info.cols) {
            return Err(PrivSearchError::ColumnOutOfRange {
                column: col as u64,
                num_cols: self.info.cols as u64,
            });
        }

        let mut weights = vec![0i64; self.info.cols];
        weights[col] = 1;
        self.query_linear(&weights)
    }

    /// Linear query with one signed weight per database column. The recovered answer holds, per row, the weighted sum
    /// of that row's records modulo the plaintext modulus.
    pub fn query_linear(&mut self, weights: &[i64]) -> Result<Query<E>, PrivSearchError> {
        if branch_opt_util::unlikely(weights.len() != self.info.cols) {
            return Err(PrivSearchError::InvalidMessageLength {
                expected: self.info.cols as u64,
                found: weights.len() as u64,
            });
        }

        let prepared = match self.prepared.take() {
            Some(prepared) => prepared,
            None if self.pending.is_some() => return Err(PrivSearchError::HintNotRecovered),
            None => return Err(PrivSearchError::NoPreprocessedSecret),
        };

        let delta = E::ONE.shl(E::BITS - self.info.params.plaintext_bits());
        let scaled_u = Matrix::row_vector(weights.iter().map(|&w| E::from_i64(w).wrapping_mul(delta)).collect())?;
        let error_e = Matrix::<E>::sample_from_uniform_ternary_dist(1, self.info.cols)?;

        let vec_as = prepared.secret_s.row_vector_x_transposed_matrix(&self.pub_mat_a)?;
        let vec_q = (&(&vec_as + &error_e)? + &scaled_u)?;

        self.in_flight = Some(prepared.hint_s);

        Ok(Query { vec_q })
    }

    /// Decodes the answer to the last query, one value in `[0, P)` per database row.
    pub fn recover(&mut self, answer: &Answer<E>) -> Result<Vec<u64>, PrivSearchError> {
        if branch_opt_util::unlikely(!answer.vec_a.has_shape(1, self.info.rows)) {
            return Err(PrivSearchError::InvalidMessageLength {
                expected: self.info.rows as u64,
                found: answer.vec_a.num_elems() as u64,
            });
        }

        let hint_s = self.in_flight.take().ok_or(PrivSearchError::NoPendingQuery)?;

        let log_p = self.info.params.plaintext_bits();
        let shift = E::BITS - log_p;
        let half_delta = E::ONE.shl(shift - 1);

        let noisy = (&answer.vec_a - &hint_s)?;
        Ok(noisy
            .elems()
            .iter()
            .map(|&v| v.wrapping_add(half_delta).shr(shift).mask(log_p).to_u64())
            .collect())
    }
}
