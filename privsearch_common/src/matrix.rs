use crate::{branch_opt_util, elem::Elem, error::PrivSearchError, params::SEED_BYTE_LEN};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Index, IndexMut, Mul, Sub};
use turboshake::TurboShake128;

/// Dense row-major matrix over Z_(2^E::BITS).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Matrix<E: Elem> {
    rows: usize,
    cols: usize,
    elems: Vec<E>,
}

impl<E: Elem> Matrix<E> {
    /// All-zero `rows x cols` matrix over the ring of `E`. Both dimensions must be non-zero.
    pub fn new(rows: usize, cols: usize) -> Result<Matrix<E>, PrivSearchError> {
        if branch_opt_util::likely((rows > 0) && (cols > 0)) {
            Ok(Matrix {
                rows,
                cols,
                elems: vec![E::ZERO; rows * cols],
            })
        } else {
            Err(PrivSearchError::InvalidMatrixDimension)
        }
    }

    /// Takes ownership of `values` as the row-major elements of a `rows x cols` matrix. Fails with
    /// `InvalidNumberOfElementsInMatrix` unless exactly `rows * cols` ring elements are given.
    pub fn from_values(rows: usize, cols: usize, values: Vec<E>) -> Result<Matrix<E>, PrivSearchError> {
        if branch_opt_util::likely((rows > 0) && (cols > 0)) {
            if branch_opt_util::likely(rows * cols == values.len()) {
                Ok(Matrix { rows, cols, elems: values })
            } else {
                Err(PrivSearchError::InvalidNumberOfElementsInMatrix)
            }
        } else {
            Err(PrivSearchError::InvalidMatrixDimension)
        }
    }

    /// Wraps a vector as a `1 x N` matrix.
    pub fn row_vector(values: Vec<E>) -> Result<Matrix<E>, PrivSearchError> {
        Matrix::from_values(1, values.len(), values)
    }

    #[inline(always)]
    pub const fn num_rows(&self) -> usize {
        self.rows
    }
    #[inline(always)]
    pub const fn num_cols(&self) -> usize {
        self.cols
    }
    #[inline(always)]
    pub fn num_elems(&self) -> usize {
        self.elems.len()
    }
    #[inline(always)]
    pub fn elems(&self) -> &[E] {
        &self.elems
    }
    #[inline(always)]
    pub fn into_elems(self) -> Vec<E> {
        self.elems
    }

    /// Checks that the matrix is internally consistent and has the expected shape. Matrices received from a peer
    /// are validated before they are used in any arithmetic.
    pub fn has_shape(&self, rows: usize, cols: usize) -> bool {
        self.rows == rows && self.cols == cols && self.elems.len() == rows * cols
    }

    /// Applies `f` to every element, possibly moving into another ring.
    pub fn map<F: Elem>(&self, f: impl Fn(E) -> F + Sync + Send) -> Matrix<F> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            elems: self.elems.par_iter().map(|&v| f(v)).collect(),
        }
    }

    /// Computes `v · rhsᵀ` for a `1 x n` vector `v` and an `m x n` matrix, i.e. the wrapping inner product of `v` with
    /// every row of `rhs`, one rayon task per row. Database answers and both hint
    /// limbs are computed this way.
    pub fn row_vector_x_transposed_matrix(&self, rhs: &Matrix<E>) -> Result<Matrix<E>, PrivSearchError> {
        if branch_opt_util::unlikely(!(self.rows == 1 && self.cols == rhs.cols)) {
            return Err(PrivSearchError::IncompatibleDimensionForRowVectorTransposedMatrixMultiplication);
        }

        let mut res_elems = vec![E::ZERO; rhs.rows];

        res_elems.par_iter_mut().enumerate().for_each(|(r_idx, v)| {
            let rhs_row = &rhs.elems[r_idx * rhs.cols..(r_idx + 1) * rhs.cols];
            *v = self
                .elems
                .iter()
                .zip(rhs_row)
                .fold(E::ZERO, |acc, (&l, &r)| acc.wrapping_add(l.wrapping_mul(r)));
        });

        Matrix::from_values(1, rhs.rows, res_elems)
    }

    /// Transposes the matrix.
    pub fn transpose(&self) -> Matrix<E> {
        let mut elems = vec![E::ZERO; self.elems.len()];

        (0..self.cols)
            .flat_map(|ridx| (0..self.rows).map(move |cidx| (ridx, cidx)))
            .for_each(|(ridx, cidx)| {
                elems[ridx * self.rows + cidx] = self[(cidx, ridx)];
            });

        Matrix {
            rows: self.cols,
            cols: self.rows,
            elems,
        }
    }

    /// `rows x rows` identity.
    #[cfg(test)]
    pub fn identity(rows: usize) -> Result<Matrix<E>, PrivSearchError> {
        let mut mat = Matrix::new(rows, rows)?;

        (0..mat.rows).for_each(|idx| {
            mat[(idx, idx)] = E::ONE;
        });

        Ok(mat)
    }

    /// Expands a public matrix from `seed`, reading `E::BITS / 8` little-endian bytes of TurboSHAKE128 output per
    /// element. Server and client derive the same matrix from the seed shipped in the hint, and distinct `DOMAIN`
    /// separators keep the matrices of both LWE layers independent.
    ///
    /// # Arguments
    ///
    /// * `rows`, `cols` - Shape of the expanded matrix.
    /// * `seed` - Public seed of the database.
    pub fn generate_from_seed<const DOMAIN: u8>(rows: usize, cols: usize, seed: &[u8; SEED_BYTE_LEN]) -> Result<Matrix<E>, PrivSearchError> {
        if branch_opt_util::unlikely(rows == 0 || cols == 0) {
            return Err(PrivSearchError::InvalidMatrixDimension);
        }

        let elem_byte_len = (E::BITS / 8) as usize;

        let mut hasher = TurboShake128::default();
        hasher.absorb(seed);
        hasher.finalize::<DOMAIN>();

        let mut elem_bytes = vec![0u8; rows * cols * elem_byte_len];
        hasher.squeeze(&mut elem_bytes);

        let elems = elem_bytes.chunks_exact(elem_byte_len).map(E::from_le_slice).collect::<Vec<E>>();

        Matrix::from_values(rows, cols, elems)
    }

    /// Samples an LWE secret or error vector with entries drawn uniformly from `{-1, 0, 1}`, where `-1` is the ring's
    /// `E::MINUS_ONE`. Only vectors are sampled, so one of `rows` and `cols` must be 1.
    pub fn sample_from_uniform_ternary_dist(rows: usize, cols: usize) -> Result<Matrix<E>, PrivSearchError> {
        if branch_opt_util::unlikely(!(rows == 1 || cols == 1)) {
            return Err(PrivSearchError::InvalidDimensionForVector);
        }

        const TERNARY_INTERVAL_SIZE: u32 = (u32::MAX - 2) / 3;
        const TERNARY_REJECTION_SAMPLING_MAX: u32 = TERNARY_INTERVAL_SIZE * 3;

        let mut rng = ChaCha8Rng::from_os_rng();
        let mut vec = Matrix::new(rows, cols)?;

        for elem in vec.elems.iter_mut() {
            let mut val = rng.random::<u32>();

            while branch_opt_util::unlikely(val > TERNARY_REJECTION_SAMPLING_MAX) {
                val = rng.random::<u32>();
            }

            *elem = if val <= TERNARY_INTERVAL_SIZE {
                E::ZERO
            } else if val <= 2 * TERNARY_INTERVAL_SIZE {
                E::ONE
            } else {
                E::MINUS_ONE
            };
        }

        Ok(vec)
    }
}

impl<E: Elem> Index<(usize, usize)> for Matrix<E> {
    type Output = E;

    #[inline(always)]
    fn index(&self, index: (usize, usize)) -> &Self::Output {
        let (ridx, cidx) = index;
        &self.elems[ridx * self.cols + cidx]
    }
}

impl<E: Elem> IndexMut<(usize, usize)> for Matrix<E> {
    #[inline(always)]
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let (ridx, cidx) = index;
        &mut self.elems[ridx * self.cols + cidx]
    }
}

impl<'b, E: Elem> Mul<&'b Matrix<E>> for &Matrix<E> {
    type Output = Result<Matrix<E>, PrivSearchError>;

    fn mul(self, rhs: &'b Matrix<E>) -> Self::Output {
        if branch_opt_util::unlikely(self.cols != rhs.rows) {
            return Err(PrivSearchError::IncompatibleDimensionForMatrixMultiplication);
        }

        let mut res_elems = vec![E::ZERO; self.rows * rhs.cols];

        res_elems.par_chunks_mut(rhs.cols).enumerate().for_each(|(r_idx, res_row)| {
            let lhs_row = &self.elems[r_idx * self.cols..(r_idx + 1) * self.cols];

            for (k, &l) in lhs_row.iter().enumerate() {
                if l == E::ZERO {
                    continue;
                }

                let rhs_row = &rhs.elems[k * rhs.cols..(k + 1) * rhs.cols];
                res_row.iter_mut().zip(rhs_row).for_each(|(acc, &r)| {
                    *acc = acc.wrapping_add(l.wrapping_mul(r));
                });
            }
        });

        Matrix::from_values(self.rows, rhs.cols, res_elems)
    }
}

impl<'b, E: Elem> Add<&'b Matrix<E>> for &Matrix<E> {
    type Output = Result<Matrix<E>, PrivSearchError>;

    fn add(self, rhs: &'b Matrix<E>) -> Self::Output {
        if branch_opt_util::unlikely(!(self.rows == rhs.rows && self.cols == rhs.cols)) {
            return Err(PrivSearchError::IncompatibleDimensionForMatrixAddition);
        }

        let res_elems = self.elems.par_iter().zip(rhs.elems.par_iter()).map(|(&l, &r)| l.wrapping_add(r)).collect();

        Matrix::from_values(self.rows, self.cols, res_elems)
    }
}

impl<'b, E: Elem> Sub<&'b Matrix<E>> for &Matrix<E> {
    type Output = Result<Matrix<E>, PrivSearchError>;

    fn sub(self, rhs: &'b Matrix<E>) -> Self::Output {
        if branch_opt_util::unlikely(!(self.rows == rhs.rows && self.cols == rhs.cols)) {
            return Err(PrivSearchError::IncompatibleDimensionForMatrixAddition);
        }

        let res_elems = self.elems.par_iter().zip(rhs.elems.par_iter()).map(|(&l, &r)| l.wrapping_sub(r)).collect();

        Matrix::from_values(self.rows, self.cols, res_elems)
    }
}

#[cfg(test)]
mod test {
    use crate::{error::PrivSearchError, matrix::Matrix, params::SEED_BYTE_LEN};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    #[test_case(64, 64 => matches Ok(_);  "Non-zero number of rows and columns are valid")]
    #[test_case(0, 64 => matches Err(PrivSearchError::InvalidMatrixDimension);  "Number of rows must be greater than zero")]
    #[test_case(64, 0 => matches Err(PrivSearchError::InvalidMatrixDimension);  "Number of columns must be greater than zero")]
    fn new_empty_matrix_constructor_api(num_rows: usize, num_cols: usize) -> Result<Matrix<u32>, PrivSearchError> {
        Matrix::new(num_rows, num_cols)
    }

    #[test_case(16, 16, vec![0u64; 256] => matches Ok(_);  "Number of values matches the shape")]
    #[test_case(16, 16, vec![0u64; 255] => matches Err(PrivSearchError::InvalidNumberOfElementsInMatrix);  "Number of elements must be equal to number of rows times number of columns")]
    #[test_case(0, 16, vec![] => matches Err(PrivSearchError::InvalidMatrixDimension);  "Number of rows must be greater than zero")]
    fn from_values_matrix_constructor_api(num_rows: usize, num_cols: usize, elems: Vec<u64>) -> Result<Matrix<u64>, PrivSearchError> {
        Matrix::from_values(num_rows, num_cols, elems)
    }

    #[test_case((32, 1), (1, 32) => matches Ok(_); "Matrix multiplication should work for valid dimensions")]
    #[test_case((32, 1), (32, 1) => matches Err(PrivSearchError::IncompatibleDimensionForMatrixMultiplication); "Matrix multiplication should not work for incompatible dimensions")]
    fn matrix_multiplication_failures(lhs_mat_dim: (usize, usize), rhs_mat_dim: (usize, usize)) -> Result<Matrix<u32>, PrivSearchError> {
        let lhs = Matrix::<u32>::new(lhs_mat_dim.0, lhs_mat_dim.1)?;
        let rhs = Matrix::<u32>::new(rhs_mat_dim.0, rhs_mat_dim.1)?;

        &lhs * &rhs
    }

    #[test_case(1, 128  => matches Ok(_); "Can sample row vector")]
    #[test_case(128, 1  => matches Ok(_); "Can sample column vector")]
    #[test_case(128, 128  => matches Err(PrivSearchError::InvalidDimensionForVector); "Either number of rows or columns must be 1 in vector")]
    fn sampling_from_uniform_ternary_dist_works(num_rows: usize, num_cols: usize) -> Result<Matrix<u64>, PrivSearchError> {
        Matrix::sample_from_uniform_ternary_dist(num_rows, num_cols)
    }

    #[test]
    fn ternary_samples_are_small() {
        let vec = Matrix::<u32>::sample_from_uniform_ternary_dist(1, 4096).expect("Must sample ternary vector");
        assert!(vec.elems().iter().all(|&v| v == 0 || v == 1 || v == u32::MAX));
    }

    #[test]
    fn matrix_multiplication_is_correct() {
        const NUM_ATTEMPT_MATRIX_MULTIPLICATIONS: usize = 20;
        const MIN_MATRIX_DIM: usize = 1;
        const MAX_MATRIX_DIM: usize = 96;

        let mut rng = ChaCha8Rng::from_os_rng();

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        for _ in 0..NUM_ATTEMPT_MATRIX_MULTIPLICATIONS {
            let num_rows = rng.random_range(MIN_MATRIX_DIM..=MAX_MATRIX_DIM);
            let num_cols = rng.random_range(MIN_MATRIX_DIM..=MAX_MATRIX_DIM);

            let matrix_a = Matrix::<u64>::generate_from_seed::<0x1f>(num_rows, num_cols, &seed).expect("Matrix must be generated from seed");
            let matrix_i = Matrix::identity(num_cols).expect("Identity matrix must be created");
            let matrix_i_prime = Matrix::identity(num_rows).expect("Identity matrix must be created");

            let matrix_ai = (&matrix_a * &matrix_i).expect("Matrix multiplication must pass");
            assert_eq!(matrix_a, matrix_ai);

            let matrix_ia = (&matrix_i_prime * &matrix_a).expect("Matrix multiplication must pass");
            assert_eq!(matrix_a, matrix_ia);
        }
    }

    #[test]
    fn row_vector_transposed_matrix_multiplication_agrees_with_product() {
        let mut rng = ChaCha8Rng::from_os_rng();

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        let vector = Matrix::<u32>::generate_from_seed::<0x1f>(1, 37, &seed).expect("Row vector must be generated from seed");
        let matrix = Matrix::<u32>::generate_from_seed::<0x0b>(53, 37, &seed).expect("Matrix must be generated from seed");

        let fast = vector.row_vector_x_transposed_matrix(&matrix).expect("Row vector matrix multiplication must pass");
        let slow = (&vector * &matrix.transpose()).expect("Matrix multiplication must pass");

        assert_eq!(fast, slow);
    }

    #[test]
    fn distinct_domains_expand_distinct_matrices() {
        let seed = [7u8; SEED_BYTE_LEN];

        let a = Matrix::<u32>::generate_from_seed::<0x1f>(8, 8, &seed).expect("Matrix must be generated from seed");
        let b = Matrix::<u32>::generate_from_seed::<0x0b>(8, 8, &seed).expect("Matrix must be generated from seed");
        let a_again = Matrix::<u32>::generate_from_seed::<0x1f>(8, 8, &seed).expect("Matrix must be generated from seed");

        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[test]
    fn addition_and_subtraction_cancel() {
        let seed = [3u8; SEED_BYTE_LEN];

        let a = Matrix::<u128>::generate_from_seed::<0x1f>(12, 9, &seed).expect("Matrix must be generated from seed");
        let b = Matrix::<u128>::generate_from_seed::<0x0b>(12, 9, &seed).expect("Matrix must be generated from seed");

        let sum = (&a + &b).expect("Matrix addition must pass");
        let diff = (&sum - &b).expect("Matrix subtraction must pass");

        assert_eq!(a, diff);
    }
}
