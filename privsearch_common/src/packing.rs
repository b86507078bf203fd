use crate::{branch_opt_util, error::PrivSearchError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A sized unit to be placed into one database column. `index` is the semantic identifier (cluster or subcluster),
/// `size` counts documents or compressed bytes, depending on the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u64,
    pub size: u64,
}

impl Chunk {
    pub const fn new(index: u64, size: u64) -> Chunk {
        Chunk { index, size }
    }
}

/// Chunks stacked into one column, in placement order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Column {
    pub chunks: Vec<Chunk>,
    pub size: u64,
}

impl Column {
    fn push(&mut self, chunk: Chunk) {
        self.size += chunk.size;
        self.chunks.push(chunk);
    }
}

/// Result of packing: the columns in creation order, the capacity actually used for the fit test, and the row count
/// `L` of the resulting database, i.e. the largest column size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packing {
    pub columns: Vec<Column>,
    pub capacity: u64,
    pub rows: u64,
}

impl Packing {
    #[inline(always)]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Sum of all packed chunk sizes, equal to the sum of the input chunk sizes.
    pub fn packed_size(&self) -> u64 {
        self.columns.iter().map(|col| col.size).sum()
    }
}

/// Packs chunks into columns with greedy first-fit-decreasing.
///
/// Chunks are sorted by decreasing size, keeping input order among equal sizes. If the largest chunk exceeds
/// `capacity`, the capacity is raised to its size. The largest chunk seeds the first column, and every following chunk
/// goes to the first column whose running size plus the chunk's size stays strictly below the capacity, or else opens
/// a new column.
///
/// # Arguments
///
/// * `chunks` - Chunks to be packed, must be non-empty.
/// * `capacity` - Initial estimate of the column capacity.
///
/// # Returns
///
/// * `Result<Packing, PrivSearchError>` - The deterministic packing, or an error if no chunks were given.
pub fn pack_chunks(chunks: &[Chunk], capacity: u64) -> Result<Packing, PrivSearchError> {
    if branch_opt_util::unlikely(chunks.is_empty()) {
        return Err(PrivSearchError::NoChunks);
    }

    let mut sorted = chunks.to_vec();
    sorted.sort_by(|a, b| b.size.cmp(&a.size));

    let largest = sorted[0];
    let capacity = capacity.max(largest.size);
    debug!(largest = largest.size, capacity, "Packing {} chunks", sorted.len());

    let mut columns = vec![Column::default()];
    columns[0].push(largest);

    for &chunk in &sorted[1..] {
        match columns.iter_mut().find(|col| col.size + chunk.size < capacity) {
            Some(col) => col.push(chunk),
            None => {
                let mut col = Column::default();
                col.push(chunk);
                columns.push(col);
            }
        }
    }

    let rows = columns.iter().map(|col| col.size).max().unwrap_or_default();

    Ok(Packing { columns, capacity, rows })
}
