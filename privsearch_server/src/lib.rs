//! PrivSearch: private web search over single-server LWE **P**rivate **I**nformation **R**etrieval (PIR).
//!
//! This crate provides the PrivSearch server. It ingests a clustered corpus, where every document carries a URL and a
//! quantized embedding vector, and lays it out into two PIR databases:
//!
//! * The embeddings database, answering linear queries. A client holding an encrypted query embedding learns the inner
//!   product score of every document in one cluster, while the server learns neither the embedding nor the cluster.
//! * The URL database, answering point queries over compressed URL chunks. A client learns the URLs of one subcluster,
//!   while the server learns nothing about which.
//!
//! ## Features
//!
//! * **Offline preprocessing:** Hints are built once per database and served verbatim. Clients turn them into a
//!   per-query secret during a query-independent offline phase, so the online phase is a single matrix-vector product.
//! * **Concurrency:** A [`Server`] is immutable once set up. Share it behind an `Arc`, and answer any number of sessions
//!   concurrently.
//! * **Split deployments:** Both databases may be served by different machines, fronted by a [`Coordinator`].
//! * **Persistence:** A set-up server can be snapshotted and loaded again, skipping database construction.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! privsearch_server = "=0.1.0"
//! ```
//!
//! ```rust
//! use privsearch_server::{EmbeddingsCorpus, Request, Response, SearchConfig, Server, UrlsCorpus};
//!
//! let config = SearchConfig {
//!     embedding_dim: 2,
//!     slot_bits: 4,
//!     embeddings_record_bits: 10,
//!     embeddings_lwe_dimension: 32,
//!     urls_lwe_dimension: 32,
//!     hint_lwe_dimension: 16,
//!     ..SearchConfig::default()
//! };
//!
//! // One record stream per cluster, `<url>\t<embedding>` per line.
//! let cluster = "https://a.example\t1,-2\nhttps://b.example\t3,0\n";
//!
//! let embeddings = EmbeddingsCorpus::read([(0, cluster.as_bytes())], &config).expect("Corpus must be read");
//! let urls = UrlsCorpus::read([(0, cluster.as_bytes())], &config).expect("Corpus must be read");
//! let server = Server::setup(Some(&embeddings), Some(&urls), &config).expect("Server setup failed");
//!
//! // Requests arrive over some transport, failures are reported back instead of bringing the server down.
//! assert!(matches!(server.respond(&Request::GetHint), Response::Hint(_)));
//! ```
//!
//! See `examples/server.rs` for a TCP server, speaking length-prefixed bincode frames.

mod coordinator;
mod corpus;
mod database;
mod persist;
mod server;
mod transport;

pub use coordinator::Coordinator;
pub use corpus::{EmbeddingsCorpus, UrlSubcluster, UrlsCorpus, open_cluster_files};
pub use database::{build_embeddings_database, build_urls_database};
pub use privsearch_common::{
    config::SearchConfig,
    error::{ErrorClass, PrivSearchError},
    hint::{CorpusParams, HintBundle},
    params::SEED_BYTE_LEN,
    wire::{self, PreprocessingAnswer, PreprocessingRequest, Request, Response, StreamTransport, Transport},
};
pub use server::Server;
pub use transport::LocalTransport;
