use divan;
use privsearch_common::{params::SEED_BYTE_LEN, pir::PirClient, wire::PreprocessingRequest};
use privsearch_server::{EmbeddingsCorpus, SearchConfig, Server, UrlsCorpus};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn main() {
    divan::main();
}

#[derive(Debug)]
struct CorpusConfig {
    num_clusters: usize,
    docs_per_cluster: usize,
    embedding_dim: u64,
}

const ARGS: &[CorpusConfig] = &[CorpusConfig {
    num_clusters: 16,
    docs_per_cluster: 64,
    embedding_dim: 192,
}];

fn search_config(corpus_config: &CorpusConfig) -> SearchConfig {
    SearchConfig {
        embedding_dim: corpus_config.embedding_dim,
        embeddings_hint_size: 1,
        urls_hint_size: 1,
        ..SearchConfig::default()
    }
}

fn generate_random_corpus(rng: &mut ChaCha8Rng, corpus_config: &CorpusConfig) -> Vec<String> {
    (0..corpus_config.num_clusters)
        .map(|cluster| {
            (0..corpus_config.docs_per_cluster)
                .map(|doc| {
                    let embedding = (0..corpus_config.embedding_dim).map(|_| rng.random_range(-16i8..16).to_string()).collect::<Vec<String>>();
                    let delim = if doc % 16 == 15 { "-----\n" } else { "" };
                    format!("https://c{}.example/{}\t{}\n{}", cluster, doc, embedding.join(","), delim)
                })
                .collect::<String>()
        })
        .collect()
}

fn setup_server(rng: &mut ChaCha8Rng, corpus_config: &CorpusConfig) -> Server {
    let config = search_config(corpus_config);
    let texts = generate_random_corpus(rng, corpus_config);
    let clusters = || texts.iter().enumerate().map(|(c, t)| (c as u64, t.as_bytes()));

    let emb = EmbeddingsCorpus::read(clusters(), &config).unwrap();
    let urls = UrlsCorpus::read(clusters(), &config).unwrap();

    let mut seed = [0u8; SEED_BYTE_LEN];
    rng.fill_bytes(&mut seed);
    Server::setup_seeded(Some(&emb), Some(&urls), &config, &seed).unwrap()
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(300), skip_ext_time = true)]
fn server_setup(bencher: divan::Bencher, corpus_config: &CorpusConfig) {
    let mut rng = ChaCha8Rng::from_os_rng();

    let config = search_config(corpus_config);
    let texts = generate_random_corpus(&mut rng, corpus_config);
    let clusters = || texts.iter().enumerate().map(|(c, t)| (c as u64, t.as_bytes()));

    let emb = EmbeddingsCorpus::read(clusters(), &config).unwrap();
    let urls = UrlsCorpus::read(clusters(), &config).unwrap();

    let mut seed = [0u8; SEED_BYTE_LEN];
    rng.fill_bytes(&mut seed);

    bencher.bench(|| Server::setup_seeded(divan::black_box(Some(&emb)), divan::black_box(Some(&urls)), &config, &seed));
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(300), skip_ext_time = true)]
fn client_hint_query(bencher: divan::Bencher, corpus_config: &CorpusConfig) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let hint = setup_server(&mut rng, corpus_config).get_hint().embeddings.unwrap();

    let client = PirClient::new(&hint.info, hint.hint).unwrap();

    bencher.with_inputs(|| client.clone()).bench_refs(|client| divan::black_box(client).hint_query());
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(300), skip_ext_time = true)]
fn server_apply_hint(bencher: divan::Bencher, corpus_config: &CorpusConfig) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let server = setup_server(&mut rng, corpus_config);

    let hint = server.get_hint();
    let (emb_hint, url_hint) = (hint.embeddings.unwrap(), hint.urls.unwrap());
    let mut emb_client = PirClient::new(&emb_hint.info, emb_hint.hint).unwrap();
    let mut url_client = PirClient::new(&url_hint.info, url_hint.hint).unwrap();

    let request = PreprocessingRequest {
        embeddings: Some(emb_client.hint_query().unwrap()),
        urls: Some(url_client.hint_query().unwrap()),
    };

    // First request derives the hint-only servers.
    server.apply_hint(&request).unwrap();

    bencher.bench(|| server.apply_hint(divan::black_box(&request)));
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(300), skip_ext_time = true)]
fn client_hint_recover(bencher: divan::Bencher, corpus_config: &CorpusConfig) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let server = setup_server(&mut rng, corpus_config);

    let hint = server.get_hint().embeddings.unwrap();
    let mut client = PirClient::new(&hint.info, hint.hint).unwrap();

    let request = PreprocessingRequest {
        embeddings: Some(client.hint_query().unwrap()),
        urls: None,
    };
    let answer = server.apply_hint(&request).unwrap().embeddings.unwrap();

    bencher
        .with_inputs(|| client.clone())
        .bench_refs(|client| divan::black_box(client).hint_recover(divan::black_box(&answer)));
}
