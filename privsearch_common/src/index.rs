//! Translation between semantic identifiers (cluster, subcluster, document) and flat database coordinates.

use crate::{branch_opt_util, error::PrivSearchError, packing::Packing};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Row-major flat index of cell `(row, col)` in a database with `m` columns.
#[inline(always)]
pub const fn db_index(row: u64, col: u64, m: u64) -> u64 {
    row * m + col
}

/// Inverse of [`db_index`], returns `(row, col)`.
#[inline(always)]
pub const fn decompose(flat: u64, m: u64) -> (u64, u64) {
    (flat / m, flat % m)
}

/// Computes the exclusive row upper bound of the chunk starting at `row_start` in column `col`.
///
/// Rows below `row_start` are scanned upwards, in the same column, until one of them is itself a chunk start or the
/// row count `l` is reached. A non-zero `max_chunk_len` bounds the scan to `row_start + max_chunk_len` rows, as no chunk
/// is longer than that.
///
/// # Arguments
///
/// * `chunk_starts` - Flat indices of all chunk starts in the database.
/// * `row_start` - First row of the chunk.
/// * `col` - Column of the chunk.
/// * `m` - Number of database columns.
/// * `l` - Number of database rows.
/// * `max_chunk_len` - Upper bound on any chunk's length, 0 if unknown.
pub fn find_end(chunk_starts: &HashSet<u64>, row_start: u64, col: u64, m: u64, l: u64, max_chunk_len: u64) -> u64 {
    let limit = if max_chunk_len > 0 { l.min(row_start.saturating_add(max_chunk_len)) } else { l };

    ((row_start + 1)..limit)
        .find(|&row| chunk_starts.contains(&db_index(row, col, m)))
        .unwrap_or(limit.max(row_start))
}

/// Location of one cluster's block in the embeddings database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub flat_index: u64,
    /// Number of documents, i.e. rows, of the block. Rows past them up to the next chunk start are padding.
    pub num_docs: u64,
}

/// Maps every cluster to the flat index of the first row of its block in the embeddings database.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMap {
    starts: BTreeMap<u64, ClusterEntry>,
}

impl ClusterMap {
    /// Records the block of every packed cluster. One packed column spans `embedding_dim` adjacent database columns.
    pub fn from_packing(packing: &Packing, embedding_dim: u64) -> Result<ClusterMap, PrivSearchError> {
        let m = packing.num_columns() as u64 * embedding_dim;
        let mut starts = BTreeMap::new();

        for (col_idx, col) in packing.columns.iter().enumerate() {
            let mut row = 0u64;

            for chunk in &col.chunks {
                let entry = ClusterEntry {
                    flat_index: db_index(row, col_idx as u64 * embedding_dim, m),
                    num_docs: chunk.size,
                };
                if branch_opt_util::unlikely(starts.insert(chunk.index, entry).is_some()) {
                    return Err(PrivSearchError::DuplicateCluster(chunk.index));
                }

                row += chunk.size;
            }
        }

        Ok(ClusterMap { starts })
    }

    /// Flat index of the first row of `cluster`'s block.
    pub fn get(&self, cluster: u64) -> Result<u64, PrivSearchError> {
        self.starts.get(&cluster).map(|e| e.flat_index).ok_or(PrivSearchError::ClusterOutOfRange(cluster))
    }

    pub fn num_docs(&self, cluster: u64) -> Result<u64, PrivSearchError> {
        self.starts.get(&cluster).map(|e| e.num_docs).ok_or(PrivSearchError::ClusterOutOfRange(cluster))
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn clusters(&self) -> impl Iterator<Item = u64> + '_ {
        self.starts.keys().copied()
    }

    /// The set of all chunk-start flat indices, consumed by [`find_end`].
    pub fn chunk_starts(&self) -> HashSet<u64> {
        self.starts.values().map(|e| e.flat_index).collect()
    }
}

/// Location of one subcluster's compressed URL blob in the URL database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubclusterEntry {
    pub flat_index: u64,
    /// Compressed length in bytes, i.e. number of rows occupied.
    pub byte_len: u64,
    /// Number of documents, i.e. URLs, held in the blob.
    pub num_docs: u64,
}

/// Identifies the subcluster behind a packed URL chunk: its cluster, its position within the cluster, and the number
/// of documents it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubclusterRef {
    pub cluster: u64,
    pub position: usize,
    pub num_docs: u64,
}

/// Document position, as resolved by [`SubclusterMap::locate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocumentLocation {
    /// Flat index of the URL chunk holding the document.
    pub flat_index: u64,
    /// Position of that chunk within the cluster.
    pub chunk: u64,
    /// Position of the document within the chunk.
    pub index_in_chunk: u64,
}

/// Maps every cluster to its subclusters' URL chunks, in subcluster order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubclusterMap {
    chunks: BTreeMap<u64, Vec<SubclusterEntry>>,
}

impl SubclusterMap {
    /// Records the location of every packed URL chunk. Chunk `i` of the packing describes `subclusters[i]`, and one
    /// packed column spans one database column.
    pub fn from_packing(packing: &Packing, subclusters: &[SubclusterRef]) -> Result<SubclusterMap, PrivSearchError> {
        let m = packing.num_columns() as u64;
        let mut placed: BTreeMap<u64, Vec<(usize, SubclusterEntry)>> = BTreeMap::new();

        for (col_idx, col) in packing.columns.iter().enumerate() {
            let mut row = 0u64;

            for chunk in &col.chunks {
                let sub = subclusters
                    .get(chunk.index as usize)
                    .ok_or_else(|| PrivSearchError::InvalidConfig(format!("packed chunk {} has no subcluster", chunk.index)))?;

                placed.entry(sub.cluster).or_default().push((
                    sub.position,
                    SubclusterEntry {
                        flat_index: db_index(row, col_idx as u64, m),
                        byte_len: chunk.size,
                        num_docs: sub.num_docs,
                    },
                ));

                row += chunk.size;
            }
        }

        let mut chunks = BTreeMap::new();
        for (cluster, mut entries) in placed {
            entries.sort_by_key(|&(position, _)| position);

            if branch_opt_util::unlikely(entries.iter().enumerate().any(|(i, &(position, _))| i != position)) {
                return Err(PrivSearchError::InvalidConfig(format!("subclusters of cluster {} are not contiguous", cluster)));
            }

            chunks.insert(cluster, entries.into_iter().map(|(_, entry)| entry).collect());
        }

        Ok(SubclusterMap { chunks })
    }

    /// URL chunks of `cluster`, in subcluster order.
    pub fn chunks(&self, cluster: u64) -> Result<&[SubclusterEntry], PrivSearchError> {
        let entries = self.chunks.get(&cluster).ok_or(PrivSearchError::ClusterOutOfRange(cluster))?;
        if branch_opt_util::unlikely(entries.is_empty()) {
            return Err(PrivSearchError::EmptyChunkSet(cluster));
        }

        Ok(entries)
    }

    /// Resolves document `doc` of `cluster`, counting documents across the cluster's subclusters in order.
    pub fn locate(&self, cluster: u64, doc: u64) -> Result<DocumentLocation, PrivSearchError> {
        let mut remaining = doc;

        for (chunk, entry) in self.chunks(cluster)?.iter().enumerate() {
            if remaining < entry.num_docs {
                return Ok(DocumentLocation {
                    flat_index: entry.flat_index,
                    chunk: chunk as u64,
                    index_in_chunk: remaining,
                });
            }
            remaining -= entry.num_docs;
        }

        Err(PrivSearchError::DocumentOutOfRange { cluster, document: doc })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clusters(&self) -> impl Iterator<Item = u64> + '_ {
        self.chunks.keys().copied()
    }

    /// Largest compressed chunk, in bytes.
    pub fn max_byte_len(&self) -> u64 {
        self.chunks.values().flatten().map(|e| e.byte_len).max().unwrap_or_default()
    }

    /// The set of all chunk-start flat indices, consumed by [`find_end`].
    pub fn chunk_starts(&self) -> HashSet<u64> {
        self.chunks.values().flatten().map(|e| e.flat_index).collect()
    }
}

#[cfg(test)]
mod test {
    use super::{ClusterMap, DocumentLocation, SubclusterMap, SubclusterRef, db_index, decompose, find_end};
    use crate::{
        error::PrivSearchError,
        packing::{Chunk, pack_chunks},
    };
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;
    use test_case::test_case;

    #[test]
    fn decompose_inverts_db_index() {
        let mut rng = ChaCha8Rng::from_os_rng();

        for _ in 0..1024 {
            let m = rng.random_range(1..=4096u64);
            let row = rng.random_range(0..=1u64 << 32);
            let col = rng.random_range(0..m);

            assert_eq!(decompose(db_index(row, col, m), m), (row, col));
        }
    }

    #[test]
    fn find_end_recovers_every_chunk_length() {
        const M: u64 = 3;
        const COL: u64 = 1;

        let lengths = [4u64, 2, 5, 1, 3];
        let l = lengths.iter().sum::<u64>();

        let mut starts = HashSet::new();
        let mut row = 0;
        for &len in &lengths {
            starts.insert(db_index(row, COL, M));
            // Neighbouring columns register their own starts on other rows.
            starts.insert(db_index(row + 1, COL - 1, M));
            starts.insert(db_index(row + 1, COL + 1, M));
            row += len;
        }

        let mut row = 0;
        for &len in &lengths {
            assert_eq!(find_end(&starts, row, COL, M, l, 0) - row, len);
            row += len;
        }
    }

    #[test_case(0, 3 => 3; "bounded scan stops early")]
    #[test_case(0, 0 => 8; "unbounded scan reaches row capacity")]
    #[test_case(6, 10 => 8; "bound never exceeds row capacity")]
    fn find_end_honours_max_chunk_len(row_start: u64, max_chunk_len: u64) -> u64 {
        let starts = HashSet::from([db_index(row_start, 0, 1)]);
        find_end(&starts, row_start, 0, 1, 8, max_chunk_len)
    }

    #[test]
    fn cluster_map_follows_packing() {
        const DIM: u64 = 4;

        let chunks = vec![Chunk::new(10, 5), Chunk::new(11, 3), Chunk::new(12, 2)];
        let packing = pack_chunks(&chunks, 6).expect("Packing must succeed");
        let map = ClusterMap::from_packing(&packing, DIM).expect("Cluster map must be built");

        let m = 2 * DIM;
        assert_eq!(map.get(10), Ok(db_index(0, 0, m)));
        assert_eq!(map.get(11), Ok(db_index(0, DIM, m)));
        assert_eq!(map.get(12), Ok(db_index(3, DIM, m)));
        assert_eq!(map.get(13), Err(PrivSearchError::ClusterOutOfRange(13)));
        assert_eq!(map.num_docs(12), Ok(2));
        assert_eq!(map.num_docs(13), Err(PrivSearchError::ClusterOutOfRange(13)));

        let starts = map.chunk_starts();
        let (row, col) = decompose(map.get(11).expect("Cluster must be mapped"), m);
        assert_eq!(find_end(&starts, row, col, m, packing.rows, 0), 3);
    }

    #[test]
    fn cluster_map_rejects_duplicate_clusters() {
        let chunks = vec![Chunk::new(1, 2), Chunk::new(1, 1)];
        let packing = pack_chunks(&chunks, 10).expect("Packing must succeed");

        assert_eq!(ClusterMap::from_packing(&packing, 2), Err(PrivSearchError::DuplicateCluster(1)));
    }

    fn two_cluster_url_map() -> SubclusterMap {
        let subclusters = vec![
            SubclusterRef { cluster: 0, position: 0, num_docs: 3 },
            SubclusterRef { cluster: 0, position: 1, num_docs: 2 },
            SubclusterRef { cluster: 1, position: 0, num_docs: 4 },
        ];
        let chunks = vec![Chunk::new(0, 30), Chunk::new(1, 20), Chunk::new(2, 40)];
        let packing = pack_chunks(&chunks, 100).expect("Packing must succeed");

        SubclusterMap::from_packing(&packing, &subclusters).expect("Subcluster map must be built")
    }

    #[test]
    fn subcluster_map_keeps_subcluster_order() {
        let map = two_cluster_url_map();

        // Packing order is [40, 30, 20], all in one column.
        let cluster0 = map.chunks(0).expect("Cluster must be mapped");
        assert_eq!(cluster0.iter().map(|e| e.flat_index).collect::<Vec<u64>>(), vec![40, 70]);
        assert_eq!(cluster0.iter().map(|e| e.byte_len).collect::<Vec<u64>>(), vec![30, 20]);
        assert_eq!(map.max_byte_len(), 40);
        assert_eq!(map.chunk_starts(), HashSet::from([0, 40, 70]));
    }

    #[test_case(0, 0 => Ok(DocumentLocation { flat_index: 40, chunk: 0, index_in_chunk: 0 }); "first document")]
    #[test_case(0, 4 => Ok(DocumentLocation { flat_index: 70, chunk: 1, index_in_chunk: 1 }); "document in second subcluster")]
    #[test_case(0, 5 => Err(PrivSearchError::DocumentOutOfRange { cluster: 0, document: 5 }); "document past the cluster")]
    #[test_case(2, 0 => Err(PrivSearchError::ClusterOutOfRange(2)); "unknown cluster")]
    fn locating_documents(cluster: u64, doc: u64) -> Result<DocumentLocation, PrivSearchError> {
        two_cluster_url_map().locate(cluster, doc)
    }
}
