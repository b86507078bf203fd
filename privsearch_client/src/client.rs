use crate::embedder::EmbeddingOracle;
use privsearch_common::{
    branch_opt_util, compression,
    error::PrivSearchError,
    hint::{CorpusParams, HintBundle},
    index::{ClusterMap, DocumentLocation, SubclusterMap, decompose, find_end},
    params::NUM_REPORTED_RESULTS,
    pir::{Answer, PirClient, Query},
    scoring::{clamp, ranked_candidates, smooth_results, sort_by_scores},
    wire::{PreprocessingAnswer, PreprocessingRequest, Request, Response, Transport},
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Lifecycle of a search session.
///
/// `Uninit → HintFetched → Ready → OfflinePreprocessed ⇄ QueryAnswered → Closed`. The offline phase for the next query
/// may be run as soon as the current query's results are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninit,
    HintFetched,
    Ready,
    OfflinePreprocessed,
    QueryAnswered,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninit => "uninit",
            SessionState::HintFetched => "hint-fetched",
            SessionState::Ready => "ready",
            SessionState::OfflinePreprocessed => "offline-preprocessed",
            SessionState::QueryAnswered => "query-answered",
            SessionState::Closed => "closed",
        }
    }
}

/// One ranked document of a search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    /// Position of the document within its cluster.
    pub document_index: u64,
    pub score: i64,
    /// `None` when the deployment does not serve URLs.
    pub url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOutcome {
    pub cluster_index: u64,
    /// Document with the largest inner product with the query.
    pub best_document: u64,
    /// Position, within the cluster, of the URL chunk that was fetched.
    pub retrieved_chunk: Option<u64>,
    pub results: Vec<SearchResult>,
}

struct EmbeddingsSession {
    pir: PirClient<u64>,
    cluster_map: ClusterMap,
    chunk_starts: HashSet<u64>,
}

struct UrlsSession {
    pir: PirClient<u32>,
    subcluster_map: SubclusterMap,
    chunk_starts: HashSet<u64>,
}

fn unexpected(response: Response) -> PrivSearchError {
    match response {
        Response::Failure(e) => PrivSearchError::ServerFailure(e),
        other => PrivSearchError::UnexpectedResponse(other.kind()),
    }
}

/// Search session against one (possibly coordinated) PrivSearch server.
///
/// A session is strictly sequential: every round's output feeds the next one. Any failed round is fatal to the session,
/// which is then closed.
pub struct Client<T: Transport> {
    transport: T,
    state: SessionState,
    bundle: Option<HintBundle>,
    params: CorpusParams,
    embeddings: Option<EmbeddingsSession>,
    urls: Option<UrlsSession>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Client<T> {
        Client {
            transport,
            state: SessionState::Uninit,
            bundle: None,
            params: CorpusParams::default(),
            embeddings: None,
            urls: None,
        }
    }

    /// Fetches the hint, sets the session up and runs the first offline phase, leaving the client ready to search.
    pub fn connect(transport: T) -> Result<Client<T>, PrivSearchError> {
        let mut client = Self::new(transport);

        client.fetch_hint()?;
        client.setup()?;
        client.preprocess()?;

        Ok(client)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn params(&self) -> &CorpusParams {
        &self.params
    }

    pub fn num_clusters(&self) -> usize {
        match (&self.embeddings, &self.urls) {
            (Some(emb), _) => emb.cluster_map.len(),
            (None, Some(urls)) => urls.subcluster_map.len(),
            (None, None) => 0,
        }
    }

    pub fn serves_urls(&self) -> bool {
        self.urls.is_some()
    }

    fn expect_state(&self, expected: &[SessionState]) -> Result<(), PrivSearchError> {
        if branch_opt_util::unlikely(!expected.contains(&self.state)) {
            return Err(PrivSearchError::UnexpectedSessionState {
                expected: expected.first().map(SessionState::name).unwrap_or_default(),
                found: self.state.name(),
            });
        }
        Ok(())
    }

    /// Fetches the hint bundle, once per session. The embeddings section is required, the URL section is optional.
    pub fn fetch_hint(&mut self) -> Result<(), PrivSearchError> {
        self.expect_state(&[SessionState::Uninit])?;

        let result = self.fetch_hint_round();
        self.close_on_error("Fetching the hint", result)
    }

    fn fetch_hint_round(&mut self) -> Result<(), PrivSearchError> {
        let bundle = match self.transport.round_trip(Request::GetHint)? {
            Response::Hint(bundle) => *bundle,
            other => return Err(unexpected(other)),
        };

        if bundle.params.num_docs == 0 {
            return Err(PrivSearchError::EmptyCorpus);
        }
        if !bundle.serves_embeddings() {
            return Err(PrivSearchError::MissingHintSection("embeddings"));
        }

        info!(
            num_docs = bundle.params.num_docs,
            embedding_dim = bundle.params.embedding_dim,
            urls = bundle.serves_urls(),
            "Fetched hint bundle"
        );

        self.params = bundle.params;
        self.bundle = Some(bundle);
        self.state = SessionState::HintFetched;
        Ok(())
    }

    /// Sets up the PIR clients from the fetched hint, and collects every database's chunk starts.
    pub fn setup(&mut self) -> Result<(), PrivSearchError> {
        self.expect_state(&[SessionState::HintFetched])?;

        let result = self.setup_clients();
        self.close_on_error("Session setup", result)
    }

    fn setup_clients(&mut self) -> Result<(), PrivSearchError> {
        let bundle = self.bundle.take().ok_or(PrivSearchError::MissingHintSection("bundle"))?;

        if let (Some(emb), Some(urls)) = (&bundle.embeddings, &bundle.urls) {
            if emb.cluster_map.len() != urls.subcluster_map.len() {
                return Err(PrivSearchError::IndexMapLengthMismatch {
                    embeddings: emb.cluster_map.len() as u64,
                    urls: urls.subcluster_map.len() as u64,
                });
            }
        }

        if let Some(emb) = bundle.embeddings {
            let chunk_starts = emb.cluster_map.chunk_starts();
            debug!(rows = emb.info.rows, cols = emb.info.cols, clusters = emb.cluster_map.len(), "Embeddings client");

            self.embeddings = Some(EmbeddingsSession {
                pir: PirClient::new(&emb.info, emb.hint)?,
                cluster_map: emb.cluster_map,
                chunk_starts,
            });
        }

        if let Some(urls) = bundle.urls {
            let chunk_starts = urls.subcluster_map.chunk_starts();
            debug!(rows = urls.info.rows, cols = urls.info.cols, chunks = chunk_starts.len(), "URL client");

            self.urls = Some(UrlsSession {
                pir: PirClient::new(&urls.info, urls.hint)?,
                subcluster_map: urls.subcluster_map,
                chunk_starts,
            });
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    /// Runs the offline phase: one fresh secret per served database, independent of any query text.
    pub fn preprocess(&mut self) -> Result<(), PrivSearchError> {
        self.expect_state(&[SessionState::Ready, SessionState::QueryAnswered])?;

        let result = self.run_offline_phase();
        self.close_on_error("Offline phase", result)
    }

    fn run_offline_phase(&mut self) -> Result<(), PrivSearchError> {
        let request = PreprocessingRequest {
            embeddings: self.embeddings.as_mut().map(|emb| emb.pir.hint_query()).transpose()?,
            urls: self.urls.as_mut().map(|urls| urls.pir.hint_query()).transpose()?,
        };

        let answer: PreprocessingAnswer = match self.transport.round_trip(Request::ApplyHint(request))? {
            Response::HintAnswer(answer) => answer,
            other => return Err(unexpected(other)),
        };

        if let Some(emb) = self.embeddings.as_mut() {
            let part = answer.embeddings.as_ref().ok_or(PrivSearchError::MissingHintSection("embeddings"))?;
            emb.pir.hint_recover(part)?;
        }
        if let Some(urls) = self.urls.as_mut() {
            let part = answer.urls.as_ref().ok_or(PrivSearchError::MissingHintSection("urls"))?;
            urls.pir.hint_recover(part)?;
        }

        debug!("Offline phase complete");
        self.state = SessionState::OfflinePreprocessed;
        Ok(())
    }

    /// Builds the linear query scoring every document of `cluster` against `embedding`. The weight vector is zero,
    /// except for the cluster's column block, which holds the clamped query embedding.
    pub fn query_embeddings(&mut self, embedding: &[i8], cluster: u64) -> Result<Query<u64>, PrivSearchError> {
        let (dim, slot_bits) = (self.params.embedding_dim, self.params.slot_bits);
        let emb = self.embeddings.as_mut().ok_or(PrivSearchError::MissingHintSection("embeddings"))?;

        if embedding.len() as u64 != dim {
            return Err(PrivSearchError::EmbeddingDimensionMismatch {
                expected: dim,
                found: embedding.len() as u64,
            });
        }

        let m = emb.pir.info().cols as u64;
        let (_, col) = decompose(emb.cluster_map.get(cluster)?, m);
        if branch_opt_util::unlikely(m % dim != 0 || col % dim != 0) {
            return Err(PrivSearchError::InvalidHint);
        }

        let mut weights = vec![0i64; m as usize];
        for (j, &v) in embedding.iter().enumerate() {
            weights[(col as usize) + j] = clamp(v as i64, slot_bits) as i64;
        }

        emb.pir.query_linear(&weights)
    }

    /// Recovers the inner product scores of the documents of `cluster`, in document order.
    pub fn reconstruct_scores(&mut self, answer: &Answer<u64>, cluster: u64) -> Result<Vec<i64>, PrivSearchError> {
        let emb = self.embeddings.as_mut().ok_or(PrivSearchError::MissingHintSection("embeddings"))?;
        let info = emb.pir.info().clone();

        let (row_start, col) = decompose(emb.cluster_map.get(cluster)?, info.cols as u64);
        let row_end = find_end(&emb.chunk_starts, row_start, col, info.cols as u64, info.rows as u64, 0);

        let num_docs = emb.cluster_map.num_docs(cluster)?;

        let values = emb.pir.recover(answer)?;
        let mut scores = smooth_results(&values[row_start as usize..row_end as usize], info.params.plaintext_modulus);

        // Rows past the cluster's last document are padding.
        scores.truncate(num_docs as usize);

        Ok(scores)
    }

    /// Builds the point query fetching the URL chunk that holds document `doc` of `cluster`.
    pub fn query_urls(&mut self, cluster: u64, doc: u64) -> Result<(Query<u32>, DocumentLocation), PrivSearchError> {
        let urls = self.urls.as_mut().ok_or(PrivSearchError::MissingHintSection("urls"))?;

        let location = urls.subcluster_map.locate(cluster, doc)?;
        let (_, col) = decompose(location.flat_index, urls.pir.info().cols as u64);

        Ok((urls.pir.query(col as usize)?, location))
    }

    /// Recovers the URLs of the chunk at `location`, in document order.
    pub fn reconstruct_urls(&mut self, answer: &Answer<u32>, location: &DocumentLocation) -> Result<Vec<String>, PrivSearchError> {
        let (url_bytes, compressed) = (self.params.url_bytes, self.params.compress_urls);
        let urls = self.urls.as_mut().ok_or(PrivSearchError::MissingHintSection("urls"))?;
        let info = urls.pir.info().clone();

        let (row_start, col) = decompose(location.flat_index, info.cols as u64);
        let row_end = find_end(&urls.chunk_starts, row_start, col, info.cols as u64, info.rows as u64, url_bytes);

        let values = urls.pir.recover(answer)?;
        let blob = values[row_start as usize..row_end as usize].iter().map(|&v| v as u8).collect::<Vec<u8>>();

        let text = if compressed {
            compression::decompress_with_retry(&blob)?
        } else {
            compression::decode_plain(&blob)
        };

        Ok(compression::split_urls(&text).into_iter().map(String::from).collect())
    }

    fn run_round<O: EmbeddingOracle>(&mut self, text: &str, oracle: &mut O) -> Result<SearchOutcome, PrivSearchError> {
        let query = oracle.embed(text)?;
        let cluster = query.cluster_index;
        info!(cluster, "Querying embeddings database");

        let emb_query = self.query_embeddings(&query.embedding, cluster)?;
        let emb_answer = match self.transport.round_trip(Request::EmbeddingsAnswer(emb_query))? {
            Response::EmbeddingsAnswer(answer) => answer,
            other => return Err(unexpected(other)),
        };

        let scores = self.reconstruct_scores(&emb_answer, cluster)?;
        let best_document = *sort_by_scores(&scores).first().ok_or(PrivSearchError::EmptyChunkSet(cluster))? as u64;
        let candidates = ranked_candidates(&scores);
        debug!(best_document, candidates = candidates.len(), "Scored cluster");

        if self.urls.is_none() {
            let results = candidates
                .into_iter()
                .take(NUM_REPORTED_RESULTS)
                .map(|(doc, score)| SearchResult {
                    document_index: doc as u64,
                    score,
                    url: None,
                })
                .collect();

            return Ok(SearchOutcome {
                cluster_index: cluster,
                best_document,
                retrieved_chunk: None,
                results,
            });
        }

        let (url_query, location) = self.query_urls(cluster, best_document)?;
        info!(cluster, chunk = location.chunk, "Querying URL database");

        let url_answer = match self.transport.round_trip(Request::UrlsAnswer(url_query))? {
            Response::UrlsAnswer(answer) => answer,
            other => return Err(unexpected(other)),
        };
        let chunk_urls = self.reconstruct_urls(&url_answer, &location)?;

        let subcluster_map = self.urls.as_ref().map(|u| &u.subcluster_map).ok_or(PrivSearchError::MissingHintSection("urls"))?;

        let mut results = Vec::with_capacity(NUM_REPORTED_RESULTS);
        for (doc, score) in candidates {
            let doc_location = subcluster_map.locate(cluster, doc as u64)?;
            if doc_location.chunk != location.chunk {
                continue;
            }

            results.push(SearchResult {
                document_index: doc as u64,
                score,
                url: chunk_urls.get(doc_location.index_in_chunk as usize).cloned(),
            });
            if results.len() == NUM_REPORTED_RESULTS {
                break;
            }
        }

        Ok(SearchOutcome {
            cluster_index: cluster,
            best_document,
            retrieved_chunk: Some(location.chunk),
            results,
        })
    }

    /// Runs one query round: embeds `text`, scores every document of its cluster, and fetches the URLs of the chunk
    /// holding the best document.
    ///
    /// # Arguments
    ///
    /// * `text` - Free-text query.
    /// * `oracle` - Computes the query's embedding and cluster.
    ///
    /// # Returns
    ///
    /// * `Result<SearchOutcome, PrivSearchError>` - Up to ten ranked results from the fetched chunk. On error, the
    ///   session is closed.
    pub fn search<O: EmbeddingOracle>(&mut self, text: &str, oracle: &mut O) -> Result<SearchOutcome, PrivSearchError> {
        self.expect_state(&[SessionState::OfflinePreprocessed])?;

        let result = self.run_round(text, oracle);
        let outcome = self.close_on_error("Search round", result)?;

        self.state = SessionState::QueryAnswered;
        Ok(outcome)
    }

    /// Closes the session if `result` is an error. `round` names the failed step in the log.
    fn close_on_error<R>(&mut self, round: &str, result: Result<R, PrivSearchError>) -> Result<R, PrivSearchError> {
        if let Err(e) = &result {
            warn!(error = %e, "{} failed, closing session", round);
            self.close();
        }
        result
    }

    pub fn close(&mut self) {
        self.transport.close();
        self.embeddings = None;
        self.urls = None;
        self.state = SessionState::Closed;
    }
}
