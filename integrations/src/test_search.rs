use std::{
    collections::BTreeMap,
    io::{BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use privsearch_client::{Client, QueryEmbedding, SessionState, StreamTransport};
use privsearch_common::{error::PrivSearchError, params::SEED_BYTE_LEN, wire};
use privsearch_server::{Coordinator, EmbeddingsCorpus, LocalTransport, SearchConfig, Server, UrlsCorpus, open_cluster_files};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use test_case::test_case;

const EMBEDDING_DIM: usize = 8;
const SLOT_BITS: u32 = 5;

fn config(compress_urls: bool) -> SearchConfig {
    SearchConfig {
        embedding_dim: EMBEDDING_DIM as u64,
        slot_bits: SLOT_BITS,
        embeddings_hint_size: 1,
        urls_hint_size: 1,
        embeddings_record_bits: 14,
        compress_urls,
        embeddings_lwe_dimension: 64,
        urls_lwe_dimension: 48,
        hint_lwe_dimension: 32,
    }
}

/// A random clustered corpus, as per-cluster record streams, along with every document's URL and embedding.
struct RandomCorpus {
    texts: Vec<String>,
    docs: BTreeMap<u64, Vec<(String, Vec<i8>)>>,
}

impl RandomCorpus {
    fn generate(rng: &mut ChaCha8Rng, num_clusters: u64) -> RandomCorpus {
        let bound = 1i8 << (SLOT_BITS - 1);
        let mut texts = Vec::new();
        let mut docs = BTreeMap::new();

        for cluster in 0..num_clusters {
            let num_docs = rng.random_range(1..=40);
            let mut text = String::new();
            let mut cluster_docs = Vec::new();

            for doc in 0..num_docs {
                if doc > 0 && rng.random_ratio(1, 8) {
                    text.push_str("-----\n");
                }

                let url = format!("https://cluster{}.example/doc/{}/{}", cluster, doc, rng.random::<u32>());
                let embedding = (0..EMBEDDING_DIM).map(|_| rng.random_range(-bound..bound)).collect::<Vec<i8>>();

                let values = embedding.iter().map(|v| v.to_string()).collect::<Vec<String>>().join(",");
                text.push_str(&format!("{}\t{}\n", url, values));
                cluster_docs.push((url, embedding));
            }

            texts.push(text);
            docs.insert(cluster, cluster_docs);
        }

        RandomCorpus { texts, docs }
    }

    fn clusters(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.texts.iter().enumerate().map(|(c, t)| (c as u64, t.as_bytes()))
    }

    fn scores(&self, cluster: u64, query: &[i8]) -> Vec<i64> {
        self.docs[&cluster]
            .iter()
            .map(|(_, emb)| emb.iter().zip(query).map(|(&a, &b)| a as i64 * b as i64).sum())
            .collect()
    }
}

fn fixed_oracle(cluster_index: u64, embedding: Vec<i8>) -> impl FnMut(&str) -> Result<QueryEmbedding, PrivSearchError> {
    move |_: &str| {
        Ok(QueryEmbedding {
            cluster_index,
            embedding: embedding.clone(),
        })
    }
}

fn check_outcome<T: privsearch_client::Transport>(client: &mut Client<T>, corpus: &RandomCorpus, rng: &mut ChaCha8Rng) {
    let bound = 1i8 << (SLOT_BITS - 1);
    let cluster = rng.random_range(0..corpus.docs.len() as u64);
    let query = (0..EMBEDDING_DIM).map(|_| rng.random_range(-bound..bound)).collect::<Vec<i8>>();

    let outcome = client.search("query", &mut fixed_oracle(cluster, query.clone())).expect("Search must succeed");
    let expected_scores = corpus.scores(cluster, &query);

    let best = expected_scores.iter().copied().max().expect("Cluster must not be empty");
    assert_eq!(outcome.cluster_index, cluster);
    assert_eq!(expected_scores[outcome.best_document as usize], best);

    for result in &outcome.results {
        assert_eq!(result.score, expected_scores[result.document_index as usize]);
        assert_eq!(result.url.as_deref(), Some(corpus.docs[&cluster][result.document_index as usize].0.as_str()));
    }
    if best != 0 {
        assert_eq!(outcome.results.first().map(|r| r.document_index), Some(outcome.best_document));
    }
}

#[test_case(true; "compressed urls")]
#[test_case(false; "plain urls")]
fn private_search_returns_best_document_and_url(compress_urls: bool) {
    const NUM_TEST_ITERATIONS: usize = 3;
    const NUM_QUERIES_PER_SESSION: usize = 4;

    let mut rng = ChaCha8Rng::from_os_rng();
    let config = config(compress_urls);

    for _ in 0..NUM_TEST_ITERATIONS {
        let num_clusters = rng.random_range(1..=12);
        let corpus = RandomCorpus::generate(&mut rng, num_clusters);

        let emb = EmbeddingsCorpus::read(corpus.clusters(), &config).expect("Corpus must be read");
        let urls = UrlsCorpus::read(corpus.clusters(), &config).expect("Corpus must be read");
        let server = Arc::new(Server::setup(Some(&emb), Some(&urls), &config).expect("Server setup failed"));

        let mut client = Client::connect(LocalTransport::new(server)).expect("Client setup failed");
        assert_eq!(client.num_clusters() as u64, num_clusters);

        for _ in 0..NUM_QUERIES_PER_SESSION {
            check_outcome(&mut client, &corpus, &mut rng);
            client.preprocess().expect("Offline phase must pass");
        }

        client.close();
        assert_eq!(client.state(), SessionState::Closed);
    }
}

#[test]
fn split_deployment_behind_coordinator() {
    let mut rng = ChaCha8Rng::from_os_rng();
    let config = config(true);
    let corpus = RandomCorpus::generate(&mut rng, 6);

    let mut seed = [0u8; SEED_BYTE_LEN];
    rng.fill_bytes(&mut seed);

    let emb = EmbeddingsCorpus::read(corpus.clusters(), &config).expect("Corpus must be read");
    let urls = UrlsCorpus::read(corpus.clusters(), &config).expect("Corpus must be read");

    let emb_server = Arc::new(Server::setup_seeded(Some(&emb), None, &config, &seed).expect("Server setup failed"));
    let url_server = Arc::new(Server::setup_seeded(None, Some(&urls), &config, &seed).expect("Server setup failed"));

    let coordinator = Coordinator::new(LocalTransport::new(emb_server), LocalTransport::new(url_server));
    let mut client = Client::connect(coordinator).expect("Client setup failed");
    assert_eq!(client.params().num_docs, corpus.docs.values().map(|d| d.len() as u64).sum::<u64>());

    for _ in 0..3 {
        check_outcome(&mut client, &corpus, &mut rng);
        client.preprocess().expect("Offline phase must pass");
    }
}

#[test]
fn corpus_files_and_snapshot_round_trip() {
    let mut rng = ChaCha8Rng::from_os_rng();
    let config = config(true);
    let corpus = RandomCorpus::generate(&mut rng, 4);

    let dir = tempfile::tempdir().expect("Temporary directory must be created");
    for (cluster, text) in corpus.texts.iter().enumerate() {
        std::fs::write(dir.path().join(format!("cluster_{}.txt", cluster)), text).expect("Cluster file must be written");
    }

    let snapshot = dir.path().join("server.snapshot");
    let build = || -> Result<Server, PrivSearchError> {
        let emb = EmbeddingsCorpus::read(open_cluster_files(dir.path(), 0..4)?, &config)?;
        let urls = UrlsCorpus::read(open_cluster_files(dir.path(), 0..4)?, &config)?;
        Server::setup(Some(&emb), Some(&urls), &config)
    };

    let built = Server::load_or_build(&snapshot, build).expect("Server must be built");
    let loaded = Server::load(&snapshot).expect("Snapshot must be loaded");
    assert_eq!(built.get_hint(), loaded.get_hint());

    let mut client = Client::connect(LocalTransport::new(Arc::new(loaded))).expect("Client setup failed");
    check_outcome(&mut client, &corpus, &mut rng);
}

/// Serves length-prefixed frames over TCP, one thread per connection.
fn serve_tcp(server: Arc<Server>, listener: TcpListener) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else { break };
        let server = server.clone();

        thread::spawn(move || {
            let mut reader = BufReader::new(stream.try_clone().expect("Stream must be cloned"));
            let mut writer = stream;
            let limit = server.max_request_byte_len();

            while let Ok(request) = wire::read_frame_limited(&mut reader, limit) {
                let response = server.respond_bytes(&request).expect("Response must be encoded");
                if wire::write_frame(&mut writer, &response).is_err() {
                    break;
                }
            }
        });
    }
}

#[test]
fn concurrent_sessions_over_tcp() {
    const NUM_SESSIONS: usize = 4;

    let mut rng = ChaCha8Rng::from_os_rng();
    let config = config(true);
    let corpus = Arc::new(RandomCorpus::generate(&mut rng, 5));

    let emb = EmbeddingsCorpus::read(corpus.clusters(), &config).expect("Corpus must be read");
    let urls = UrlsCorpus::read(corpus.clusters(), &config).expect("Corpus must be read");
    let server = Arc::new(Server::setup(Some(&emb), Some(&urls), &config).expect("Server setup failed"));

    let listener = TcpListener::bind("127.0.0.1:0").expect("Listener must bind");
    let address = listener.local_addr().expect("Listener must have an address");
    thread::spawn(move || serve_tcp(server, listener));

    let sessions = (0..NUM_SESSIONS)
        .map(|_| {
            let corpus = corpus.clone();

            thread::spawn(move || {
                let mut rng = ChaCha8Rng::from_os_rng();
                let stream = TcpStream::connect(address).expect("Client must connect");

                let mut client = Client::connect(StreamTransport::new(stream)).expect("Client setup failed");
                check_outcome(&mut client, &corpus, &mut rng);
                client.close();
            })
        })
        .collect::<Vec<_>>();

    for session in sessions {
        session.join().expect("Session must not panic");
    }

    // A malformed frame gets a failure response, and the server keeps serving.
    let mut stream = TcpStream::connect(address).expect("Client must connect");
    wire::write_frame(&mut stream, &[0xff; 3]).expect("Frame must be written");
    let mut reader = BufReader::new(stream.try_clone().expect("Stream must be cloned"));
    let response = wire::decode::<wire::Response>(&wire::read_frame(&mut reader).expect("Frame must be read")).expect("Response must decode");
    assert!(matches!(response, wire::Response::Failure(_)));

    wire::write_frame(&mut stream, &wire::encode(&wire::Request::GetHint).expect("Request must encode")).expect("Frame must be written");
    let response = wire::decode::<wire::Response>(&wire::read_frame(&mut reader).expect("Frame must be read")).expect("Response must decode");
    assert!(matches!(response, wire::Response::Hint(_)));

    // A frame announcing more than any request can hold is dropped along with its connection.
    stream.write_all(&u32::MAX.to_le_bytes()).expect("Header must be written");
    assert!(wire::read_frame(&mut reader).is_err());
}
