use crate::{
    corpus::{EmbeddingsCorpus, UrlsCorpus},
    database::{build_embeddings_database, build_urls_database},
};
use privsearch_common::{
    branch_opt_util,
    config::SearchConfig,
    error::PrivSearchError,
    hint::{CorpusParams, HintBundle},
    params::SEED_BYTE_LEN,
    pir::{Answer, HintServer, PirDatabase, Query},
    wire::{self, PreprocessingAnswer, PreprocessingRequest, Request, Response},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Search server, holding one immutable hint bundle and up to two PIR databases.
///
/// All operations take `&self` and only read shared state, so one server, wrapped in an `Arc`, serves any number of
/// concurrent sessions. The hint-only servers answering offline-phase requests are derived from the database hints on
/// first use, exactly once.
#[derive(Debug)]
pub struct Server {
    pub(crate) bundle: HintBundle,
    pub(crate) embeddings: Option<PirDatabase<u64>>,
    pub(crate) urls: Option<PirDatabase<u32>>,
    embeddings_hint_server: OnceLock<HintServer<u64>>,
    urls_hint_server: OnceLock<HintServer<u32>>,
}

impl Server {
    pub(crate) fn from_parts(bundle: HintBundle, embeddings: Option<PirDatabase<u64>>, urls: Option<PirDatabase<u32>>) -> Server {
        Server {
            bundle,
            embeddings,
            urls,
            embeddings_hint_server: OnceLock::new(),
            urls_hint_server: OnceLock::new(),
        }
    }

    /// Sets up a server for the given corpora, with freshly sampled public matrices. At least one corpus must be given.
    ///
    /// # Arguments
    ///
    /// * `embeddings` - Corpus of the embeddings database, if served.
    /// * `urls` - Corpus of the URL database, if served.
    /// * `config` - Deployment configuration.
    ///
    /// # Returns
    ///
    /// * `Result<Server, PrivSearchError>` - The server, or an error if a database could not be built.
    pub fn setup(embeddings: Option<&EmbeddingsCorpus>, urls: Option<&UrlsCorpus>, config: &SearchConfig) -> Result<Server, PrivSearchError> {
        let mut rng = ChaCha8Rng::from_os_rng();
        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        Self::setup_seeded(embeddings, urls, config, &seed)
    }

    /// Same as [`Server::setup`], but with public matrices expanded from `seed`, for reproducible databases.
    pub fn setup_seeded(
        embeddings: Option<&EmbeddingsCorpus>,
        urls: Option<&UrlsCorpus>,
        config: &SearchConfig,
        seed: &[u8; SEED_BYTE_LEN],
    ) -> Result<Server, PrivSearchError> {
        config.validate()?;

        let params = match (embeddings, urls) {
            (Some(emb), Some(url)) => CorpusParams {
                url_bytes: url.params().url_bytes,
                compress_urls: url.params().compress_urls,
                ..*emb.params()
            },
            (Some(emb), None) => *emb.params(),
            (None, Some(url)) => *url.params(),
            (None, None) => return Err(PrivSearchError::EmptyCorpus),
        };

        let (emb_db, emb_hint) = match embeddings {
            Some(corpus) => {
                let (db, hint) = build_embeddings_database(corpus, config, seed)?;
                (Some(db), Some(hint))
            }
            None => (None, None),
        };

        let (url_db, url_hint) = match urls {
            Some(corpus) => {
                let (db, hint) = build_urls_database(corpus, config, seed)?;
                (Some(db), Some(hint))
            }
            None => (None, None),
        };

        // Clients refuse a bundle whose index maps disagree.
        if let (Some(emb), Some(url)) = (&emb_hint, &url_hint) {
            if branch_opt_util::unlikely(emb.cluster_map.len() != url.subcluster_map.len()) {
                return Err(PrivSearchError::IndexMapLengthMismatch {
                    embeddings: emb.cluster_map.len() as u64,
                    urls: url.subcluster_map.len() as u64,
                });
            }
        }

        let bundle = HintBundle {
            params,
            embeddings: emb_hint,
            urls: url_hint,
        };

        info!(
            num_docs = bundle.params.num_docs,
            embeddings = bundle.serves_embeddings(),
            urls = bundle.serves_urls(),
            "Server is ready"
        );
        Ok(Self::from_parts(bundle, emb_db, url_db))
    }

    /// Largest encoded request this server can be sent, given the shape of its databases. Frames announcing more bytes
    /// are malformed, and should be dropped before their payload is read.
    pub fn max_request_byte_len(&self) -> usize {
        let (mut online, mut offline) = (0, 0);

        if let Some(emb) = &self.bundle.embeddings {
            online = online.max(emb.info.cols * size_of::<u64>());
            offline += emb.info.params.lwe_dimension * size_of::<u128>();
        }
        if let Some(urls) = &self.bundle.urls {
            online = online.max(urls.info.cols * size_of::<u32>());
            offline += urls.info.params.lwe_dimension * size_of::<u64>();
        }

        wire::REQUEST_ENVELOPE_BYTE_LEN + online.max(offline)
    }

    /// The hint bundle, verbatim.
    pub fn get_hint(&self) -> HintBundle {
        self.bundle.clone()
    }

    pub fn get_embeddings_answer(&self, query: &Query<u64>) -> Result<Answer<u64>, PrivSearchError> {
        self.embeddings.as_ref().ok_or(PrivSearchError::DatabaseNotServed("embeddings"))?.answer(query)
    }

    pub fn get_urls_answer(&self, query: &Query<u32>) -> Result<Answer<u32>, PrivSearchError> {
        self.urls.as_ref().ok_or(PrivSearchError::DatabaseNotServed("urls"))?.answer(query)
    }

    /// Answers an offline-phase request, deriving the hint-only servers on first use.
    pub fn apply_hint(&self, request: &PreprocessingRequest) -> Result<PreprocessingAnswer, PrivSearchError> {
        let embeddings = match &request.embeddings {
            Some(query) => {
                let db = self.embeddings.as_ref().ok_or(PrivSearchError::DatabaseNotServed("embeddings"))?;
                let hint_server = self.embeddings_hint_server.get_or_init(|| {
                    debug!("Deriving embeddings hint server");
                    db.hint_server()
                });
                Some(hint_server.answer(query)?)
            }
            None => None,
        };

        let urls = match &request.urls {
            Some(query) => {
                let db = self.urls.as_ref().ok_or(PrivSearchError::DatabaseNotServed("urls"))?;
                let hint_server = self.urls_hint_server.get_or_init(|| {
                    debug!("Deriving URL hint server");
                    db.hint_server()
                });
                Some(hint_server.answer(query)?)
            }
            None => None,
        };

        Ok(PreprocessingAnswer { embeddings, urls })
    }

    /// Dispatches one request.
    pub fn handle(&self, request: &Request) -> Result<Response, PrivSearchError> {
        match request {
            Request::GetHint => Ok(Response::Hint(Box::new(self.get_hint()))),
            Request::ApplyHint(req) => self.apply_hint(req).map(Response::HintAnswer),
            Request::EmbeddingsAnswer(query) => self.get_embeddings_answer(query).map(Response::EmbeddingsAnswer),
            Request::UrlsAnswer(query) => self.get_urls_answer(query).map(Response::UrlsAnswer),
        }
    }

    /// Dispatches one request, reporting any failure back to the caller instead of propagating it.
    pub fn respond(&self, request: &Request) -> Response {
        match self.handle(request) {
            Ok(response) => response,
            Err(e) => {
                branch_opt_util::cold();
                warn!(kind = request.kind(), error = %e, "Failed to serve request");
                Response::Failure(e.to_string())
            }
        }
    }

    /// Decodes a request, responds to it, and encodes the response. Undecodable requests get a failure response too.
    pub fn respond_bytes(&self, request: &[u8]) -> Result<Vec<u8>, PrivSearchError> {
        let response = match wire::decode::<Request>(request) {
            Ok(request) => self.respond(&request),
            Err(e) => {
                warn!(error = %e, "Received malformed request");
                Response::Failure(e.to_string())
            }
        };

        wire::encode(&response)
    }
}
