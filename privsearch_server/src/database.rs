//! Lays packed chunks out into the dense value buffers handed to the PIR scheme.

use crate::corpus::{EmbeddingsCorpus, UrlsCorpus};
use privsearch_common::{
    config::SearchConfig,
    error::PrivSearchError,
    hint::{EmbeddingsHint, UrlsHint},
    index::{ClusterMap, SubclusterMap, db_index},
    packing::pack_chunks,
    params::{EMBEDDINGS_ROW_SCALE, SEED_BYTE_LEN, URLS_BYTES_SCALE, URLS_ROW_SCALE},
    pir::{self, PirDatabase},
    scoring::check_inner_product_bound,
};
use tracing::info;

fn check_extent(expected: u64, found: u64) -> Result<(), PrivSearchError> {
    if expected != found {
        return Err(PrivSearchError::PopulatedExtentMismatch { expected, found });
    }
    Ok(())
}

/// Builds the embeddings database. One packed column spans `embedding_dim` adjacent database columns, and every
/// document occupies one row across them.
///
/// # Arguments
///
/// * `corpus` - Embeddings of all documents.
/// * `config` - Deployment configuration.
/// * `seed` - Seed of the database's public matrices.
///
/// # Returns
///
/// * `Result<(PirDatabase<u64>, EmbeddingsHint), PrivSearchError>` - Database handle and its hint section, or an error if
///   inner products could wrap around modulo the plaintext modulus.
pub fn build_embeddings_database(
    corpus: &EmbeddingsCorpus,
    config: &SearchConfig,
    seed: &[u8; SEED_BYTE_LEN],
) -> Result<(PirDatabase<u64>, EmbeddingsHint), PrivSearchError> {
    let params = config.embeddings_pir_params();
    let dim = corpus.params().embedding_dim;
    check_inner_product_bound(params.plaintext_modulus, corpus.params().slot_bits, dim)?;

    let capacity = config.embeddings_hint_size * EMBEDDINGS_ROW_SCALE;
    let packing = pack_chunks(&corpus.chunks(), capacity)?;

    let l = packing.rows;
    let m = packing.num_columns() as u64 * dim;
    info!(l, m, num_docs = corpus.params().num_docs, "Laying out embeddings database");

    let cluster_map = ClusterMap::from_packing(&packing, dim)?;

    let p = params.plaintext_modulus as i64;
    let mut values = vec![0u64; (l * m) as usize];
    let mut populated = 0u64;

    for (col_idx, col) in packing.columns.iter().enumerate() {
        let mut row = 0u64;

        for chunk in &col.chunks {
            let embeddings = corpus
                .cluster_embeddings(chunk.index)
                .ok_or(PrivSearchError::ClusterOutOfRange(chunk.index))?;

            for doc in embeddings.chunks_exact(dim as usize) {
                if row >= l {
                    return Err(PrivSearchError::PopulatedExtentMismatch { expected: l, found: row + 1 });
                }

                for (j, &v) in doc.iter().enumerate() {
                    values[db_index(row, col_idx as u64 * dim + j as u64, m) as usize] = (v as i64).rem_euclid(p) as u64;
                }

                populated += dim;
                row += 1;
            }
        }
    }
    check_extent(corpus.params().num_docs * dim, populated)?;

    let (db, hint, info) = pir::setup::<u64>(&values, l as usize, m as usize, &params, seed)?;
    check_extent(l, info.rows as u64)?;

    info!(rows = info.rows, cols = info.cols, clusters = cluster_map.len(), "Built embeddings database");
    Ok((db, EmbeddingsHint { info, hint, cluster_map }))
}

/// Builds the URL database. One packed column is one database column, every compressed byte occupies one row.
pub fn build_urls_database(
    corpus: &UrlsCorpus,
    config: &SearchConfig,
    seed: &[u8; SEED_BYTE_LEN],
) -> Result<(PirDatabase<u32>, UrlsHint), PrivSearchError> {
    let params = config.urls_pir_params();

    let capacity = (config.urls_hint_size * URLS_ROW_SCALE).max(corpus.params().url_bytes * URLS_BYTES_SCALE);
    let packing = pack_chunks(&corpus.chunks(), capacity)?;

    let l = packing.rows;
    let m = packing.num_columns() as u64;
    info!(l, m, packed = packing.packed_size(), "Laying out URL database");

    let subclusters = corpus.subclusters();
    let subcluster_map = SubclusterMap::from_packing(&packing, &corpus.subcluster_refs())?;

    let mut values = vec![0u64; (l * m) as usize];
    let mut populated = 0u64;

    for (col_idx, col) in packing.columns.iter().enumerate() {
        let mut row = 0u64;

        for chunk in &col.chunks {
            let sub = subclusters
                .get(chunk.index as usize)
                .ok_or(PrivSearchError::ClusterOutOfRange(chunk.index))?;

            for &byte in &sub.blob {
                if row >= l {
                    return Err(PrivSearchError::PopulatedExtentMismatch { expected: l, found: row + 1 });
                }

                values[db_index(row, col_idx as u64, m) as usize] = byte as u64;
                populated += 1;
                row += 1;
            }
        }
    }
    check_extent(subclusters.iter().map(|s| s.blob.len() as u64).sum(), populated)?;

    let (db, hint, info) = pir::setup::<u32>(&values, l as usize, m as usize, &params, seed)?;
    check_extent(l, info.rows as u64)?;

    info!(rows = info.rows, cols = info.cols, clusters = subcluster_map.len(), "Built URL database");
    Ok((db, UrlsHint { info, hint, subcluster_map }))
}

#[cfg(test)]
mod test {
    use super::{build_embeddings_database, build_urls_database};
    use crate::corpus::{EmbeddingsCorpus, UrlsCorpus};
    use privsearch_common::{
        config::SearchConfig,
        error::PrivSearchError,
        index::{decompose, find_end},
        params::SEED_BYTE_LEN,
    };

    fn small_config() -> SearchConfig {
        SearchConfig {
            embedding_dim: 4,
            slot_bits: 4,
            embeddings_hint_size: 1,
            urls_hint_size: 1,
            embeddings_record_bits: 12,
            compress_urls: true,
            embeddings_lwe_dimension: 32,
            urls_lwe_dimension: 32,
            hint_lwe_dimension: 16,
        }
    }

    fn cluster_text(cluster: u64, docs: usize) -> String {
        (0..docs)
            .map(|d| format!("https://c{}.example/{}\t{},{},-{},0\n{}", cluster, d, d % 8, cluster % 8, d % 8, if d % 3 == 2 { "-----\n" } else { "" }))
            .collect()
    }

    #[test]
    fn embeddings_layout_matches_cluster_map() {
        let config = small_config();
        let texts = [(0u64, cluster_text(0, 130)), (1, cluster_text(1, 7)), (2, cluster_text(2, 60))];
        let corpus = EmbeddingsCorpus::read(texts.iter().map(|(c, t)| (*c, t.as_bytes())), &config).expect("Corpus must be read");

        let (db, hint) = build_embeddings_database(&corpus, &config, &[3u8; SEED_BYTE_LEN]).expect("Database must be built");

        // Capacity is 125 rows, raised to the largest cluster of 130 documents.
        assert_eq!(db.info().rows, 130);
        assert_eq!(db.info().cols % 4, 0);

        let starts = hint.cluster_map.chunk_starts();
        for cluster in 0..3 {
            let (row, col) = decompose(hint.cluster_map.get(cluster).expect("Cluster must be mapped"), hint.info.cols as u64);
            assert_eq!(col % 4, 0);

            let end = find_end(&starts, row, col, hint.info.cols as u64, hint.info.rows as u64, 0);
            assert!(end - row >= corpus.num_docs_in_cluster(cluster));
            assert_eq!(hint.cluster_map.num_docs(cluster), Ok(corpus.num_docs_in_cluster(cluster)));
        }
    }

    #[test]
    fn wrapping_parameters_abort_construction() {
        let config = SearchConfig {
            embeddings_record_bits: 8,
            ..small_config()
        };
        let text = cluster_text(0, 3);
        let corpus = EmbeddingsCorpus::read([(0, text.as_bytes())], &small_config()).expect("Corpus must be read");

        assert!(matches!(
            build_embeddings_database(&corpus, &config, &[0u8; SEED_BYTE_LEN]),
            Err(PrivSearchError::InnerProductMayWrap { .. })
        ));
    }

    #[test]
    fn url_chunks_are_bounded_by_their_byte_length() {
        let config = small_config();
        let texts = [(0u64, cluster_text(0, 20)), (1, cluster_text(1, 5))];
        let corpus = UrlsCorpus::read(texts.iter().map(|(c, t)| (*c, t.as_bytes())), &config).expect("Corpus must be read");

        let (db, hint) = build_urls_database(&corpus, &config, &[4u8; SEED_BYTE_LEN]).expect("Database must be built");

        // Capacity is 250 bytes, and no compressed subcluster comes close.
        assert!(db.info().rows < 250);

        let starts = hint.subcluster_map.chunk_starts();
        let m = hint.info.cols as u64;
        let l = hint.info.rows as u64;
        for cluster in 0..2 {
            for entry in hint.subcluster_map.chunks(cluster).expect("Cluster must be mapped") {
                let (row, col) = decompose(entry.flat_index, m);
                let end = find_end(&starts, row, col, m, l, corpus.params().url_bytes);
                assert!(end - row >= entry.byte_len);
            }
        }
    }
}
