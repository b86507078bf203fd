//! Readers turning per-cluster record streams into sized chunks.
//!
//! Every cluster is one stream of lines. A record line is `<url>\t<v1>,<v2>,...,<vd>`, a line holding only the
//! subcluster sentinel starts the cluster's next subcluster, and empty lines are skipped. Both readers see the same
//! documents in the same order, so document `i` of a cluster denotes the same record in both databases.

use privsearch_common::{
    compression,
    config::SearchConfig,
    error::PrivSearchError,
    hint::CorpusParams,
    index::SubclusterRef,
    packing::Chunk,
    params::{EMBEDDING_VALUE_DELIM, MAX_URL_LEN, RECORD_FIELD_DELIM, SUBCLUSTER_DELIM, URL_PLACEHOLDER},
    scoring::clamp,
};
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufRead, BufReader},
    ops::Range,
    path::Path,
};
use tracing::{debug, info, warn};

/// Opens `<dir>/cluster_<id>.txt` for every cluster id in `clusters`.
pub fn open_cluster_files<P: AsRef<Path>>(dir: P, clusters: Range<u64>) -> Result<Vec<(u64, BufReader<File>)>, PrivSearchError> {
    clusters
        .map(|cluster| {
            let path = dir.as_ref().join(format!("cluster_{}.txt", cluster));
            let file = File::open(&path).map_err(|e| PrivSearchError::Io(format!("{}: {}", path.display(), e)))?;
            Ok((cluster, BufReader::new(file)))
        })
        .collect()
}

fn parse_embedding(line: &str, config: &SearchConfig) -> Result<Vec<i8>, PrivSearchError> {
    let (_, values) = line
        .split_once(RECORD_FIELD_DELIM)
        .ok_or_else(|| PrivSearchError::MalformedCorpusRecord(format!("no embedding in '{}'", line)))?;

    let values = values.split(EMBEDDING_VALUE_DELIM).map(str::trim).collect::<Vec<&str>>();
    if values.len() as u64 != config.embedding_dim {
        return Err(PrivSearchError::EmbeddingDimensionMismatch {
            expected: config.embedding_dim,
            found: values.len() as u64,
        });
    }

    values
        .into_iter()
        .map(|v| {
            v.parse::<i64>()
                .map(|v| clamp(v, config.slot_bits))
                .map_err(|e| PrivSearchError::MalformedCorpusRecord(format!("'{}': {}", v, e)))
        })
        .collect()
}

fn parse_url(line: &str) -> Result<&str, PrivSearchError> {
    let url = line.split(RECORD_FIELD_DELIM).next().unwrap_or_default().trim();

    if url.is_empty() {
        return Err(PrivSearchError::MalformedCorpusRecord(format!("no URL in '{}'", line)));
    }
    if url.len() > MAX_URL_LEN {
        return Ok(URL_PLACEHOLDER);
    }

    Ok(url)
}

/// Embedding vectors of every document, grouped by cluster.
#[derive(Clone, Debug)]
pub struct EmbeddingsCorpus {
    params: CorpusParams,
    clusters: BTreeMap<u64, Vec<i8>>,
}

impl EmbeddingsCorpus {
    /// Reads one record stream per cluster. Embedding values are saturated to `config.slot_bits` signed bits.
    pub fn read<I, R>(clusters: I, config: &SearchConfig) -> Result<EmbeddingsCorpus, PrivSearchError>
    where
        I: IntoIterator<Item = (u64, R)>,
        R: BufRead,
    {
        config.validate()?;

        let mut corpus = EmbeddingsCorpus {
            params: CorpusParams {
                num_docs: 0,
                embedding_dim: config.embedding_dim,
                slot_bits: config.slot_bits,
                url_bytes: 0,
                compress_urls: config.compress_urls,
            },
            clusters: BTreeMap::new(),
        };

        for (cluster, reader) in clusters {
            let mut embeddings = Vec::new();

            for line in reader.lines() {
                let line = line?;
                if line.is_empty() || line == SUBCLUSTER_DELIM {
                    continue;
                }

                embeddings.extend(parse_embedding(&line, config)?);
            }

            if embeddings.is_empty() {
                warn!(cluster, "Skipping cluster without documents");
                continue;
            }
            if corpus.clusters.contains_key(&cluster) {
                return Err(PrivSearchError::DuplicateCluster(cluster));
            }

            corpus.params.num_docs += embeddings.len() as u64 / config.embedding_dim;
            corpus.clusters.insert(cluster, embeddings);
        }

        if corpus.params.num_docs == 0 {
            return Err(PrivSearchError::EmptyCorpus);
        }

        info!(num_docs = corpus.params.num_docs, num_clusters = corpus.clusters.len(), "Read embeddings corpus");
        Ok(corpus)
    }

    pub fn params(&self) -> &CorpusParams {
        &self.params
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn num_docs_in_cluster(&self, cluster: u64) -> u64 {
        self.clusters
            .get(&cluster)
            .map_or(0, |e| e.len() as u64 / self.params.embedding_dim)
    }

    /// Embeddings of all documents of `cluster`, concatenated.
    pub fn cluster_embeddings(&self, cluster: u64) -> Option<&[i8]> {
        self.clusters.get(&cluster).map(Vec::as_slice)
    }

    /// One chunk per cluster, sized by its document count.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.clusters.keys().map(|&cluster| Chunk::new(cluster, self.num_docs_in_cluster(cluster))).collect()
    }
}

/// Compressed URL blob of one subcluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlSubcluster {
    pub cluster: u64,
    /// Position within the cluster.
    pub position: usize,
    pub num_docs: u64,
    pub blob: Vec<u8>,
}

/// URLs of every document, as one blob per subcluster.
#[derive(Clone, Debug)]
pub struct UrlsCorpus {
    params: CorpusParams,
    subclusters: Vec<UrlSubcluster>,
}

impl UrlsCorpus {
    /// Reads one record stream per cluster. Subclusters of a cluster are compressed in parallel, and all of them are
    /// finished before the next cluster is read.
    pub fn read<I, R>(clusters: I, config: &SearchConfig) -> Result<UrlsCorpus, PrivSearchError>
    where
        I: IntoIterator<Item = (u64, R)>,
        R: BufRead,
    {
        config.validate()?;

        let mut corpus = UrlsCorpus {
            params: CorpusParams {
                num_docs: 0,
                embedding_dim: config.embedding_dim,
                slot_bits: config.slot_bits,
                url_bytes: 0,
                compress_urls: config.compress_urls,
            },
            subclusters: Vec::new(),
        };
        let mut seen = BTreeSet::new();

        for (cluster, reader) in clusters {
            let mut urls: Vec<Vec<String>> = vec![Vec::new()];

            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }

                if line == SUBCLUSTER_DELIM {
                    urls.push(Vec::new());
                } else if let Some(current) = urls.last_mut() {
                    current.push(parse_url(&line)?.to_string());
                }
            }

            urls.retain(|sub| !sub.is_empty());
            if urls.is_empty() {
                warn!(cluster, "Skipping cluster without documents");
                continue;
            }
            if !seen.insert(cluster) {
                return Err(PrivSearchError::DuplicateCluster(cluster));
            }

            let blobs = urls
                .par_iter()
                .map(|sub| {
                    let text = compression::join_urls(sub.as_slice());
                    let blob = if config.compress_urls { compression::compress(&text)? } else { text.into_bytes() };
                    Ok((sub.len() as u64, blob))
                })
                .collect::<Result<Vec<(u64, Vec<u8>)>, PrivSearchError>>()?;

            for (position, (num_docs, blob)) in blobs.into_iter().enumerate() {
                corpus.params.num_docs += num_docs;
                corpus.params.url_bytes = corpus.params.url_bytes.max(blob.len() as u64);
                corpus.subclusters.push(UrlSubcluster {
                    cluster,
                    position,
                    num_docs,
                    blob,
                });
            }

            debug!(cluster, "Finished cluster");
        }

        if corpus.params.num_docs == 0 {
            return Err(PrivSearchError::EmptyCorpus);
        }

        info!(
            num_docs = corpus.params.num_docs,
            num_subclusters = corpus.subclusters.len(),
            url_bytes = corpus.params.url_bytes,
            "Read URL corpus"
        );
        Ok(corpus)
    }

    pub fn params(&self) -> &CorpusParams {
        &self.params
    }

    pub fn subclusters(&self) -> &[UrlSubcluster] {
        &self.subclusters
    }

    /// One chunk per subcluster, sized by its blob's byte length. Chunk `i` describes subcluster `i`.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.subclusters
            .iter()
            .enumerate()
            .map(|(i, sub)| Chunk::new(i as u64, sub.blob.len() as u64))
            .collect()
    }

    pub fn subcluster_refs(&self) -> Vec<SubclusterRef> {
        self.subclusters
            .iter()
            .map(|sub| SubclusterRef {
                cluster: sub.cluster,
                position: sub.position,
                num_docs: sub.num_docs,
            })
            .collect()
    }
}
