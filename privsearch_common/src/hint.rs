use crate::{
    error::PrivSearchError,
    index::{ClusterMap, SubclusterMap},
    pir::{DbInfo, PirHint},
};
use serde::{Deserialize, Serialize};

/// Corpus-wide parameters, computed once at ingestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusParams {
    pub num_docs: u64,
    pub embedding_dim: u64,
    pub slot_bits: u32,
    /// Length of the largest compressed URL chunk, in bytes.
    pub url_bytes: u64,
    pub compress_urls: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsHint {
    pub info: DbInfo,
    pub hint: PirHint<u64>,
    pub cluster_map: ClusterMap,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UrlsHint {
    pub info: DbInfo,
    pub hint: PirHint<u32>,
    pub subcluster_map: SubclusterMap,
}

/// Everything a client fetches once per session. Built once per database and served verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HintBundle {
    pub params: CorpusParams,
    pub embeddings: Option<EmbeddingsHint>,
    pub urls: Option<UrlsHint>,
}

impl HintBundle {
    pub fn serves_embeddings(&self) -> bool {
        self.embeddings.is_some()
    }

    pub fn serves_urls(&self) -> bool {
        self.urls.is_some()
    }

    /// Combines the bundles of two servers, each serving a different database. Document count and embedding
    /// parameters come from the embeddings side, URL parameters from the URL side.
    pub fn merge(self, other: HintBundle) -> Result<HintBundle, PrivSearchError> {
        if self.embeddings.is_some() && other.embeddings.is_some() {
            return Err(PrivSearchError::InvalidConfig(String::from("both bundles serve the embeddings database")));
        }
        if self.urls.is_some() && other.urls.is_some() {
            return Err(PrivSearchError::InvalidConfig(String::from("both bundles serve the URL database")));
        }

        let (emb_side, url_side) = if self.serves_embeddings() || other.serves_urls() {
            (self, other)
        } else {
            (other, self)
        };

        let params = CorpusParams {
            num_docs: emb_side.params.num_docs,
            embedding_dim: emb_side.params.embedding_dim,
            slot_bits: emb_side.params.slot_bits,
            url_bytes: url_side.params.url_bytes,
            compress_urls: url_side.params.compress_urls,
        };

        Ok(HintBundle {
            params,
            embeddings: emb_side.embeddings.or(url_side.embeddings),
            urls: url_side.urls.or(emb_side.urls),
        })
    }
}
