//! PrivSearch: private web search over single-server LWE **P**rivate **I**nformation **R**etrieval (PIR).
//!
//! This crate provides the PrivSearch client. A client finds the document most relevant to a free-text query, and
//! that document's URL, without revealing the query, its cluster or the retrieved document to the server.
//!
//! ## Features
//!
//! * **Two-round private search:** The first round scores every document of the query's cluster with one linear PIR
//!   query over the embeddings database. The second round fetches the URL chunk of the best document with one point
//!   PIR query over the URL database.
//! * **Offline preprocessing:** Query-independent work is done ahead of time, once per query, so the interactive rounds
//!   stay fast. It can run as soon as the previous query's results are reported.
//! * **Exact bookkeeping:** Chunk boundaries are inferred from the index maps shipped with the hint, never sent per query.
//! * **Error Handling:** Precondition violations are reported at session setup, and failed rounds close the session.
//!
//! ## Usage
//!
//! The client talks to a server through any [`Transport`]. Embeddings are computed by an [`EmbeddingOracle`], for
//! example an external inference process driven by [`LineEmbedder`].
//!
//! ```toml
//! [dependencies]
//! privsearch_client = "=0.1.0"
//! ```
//!
//! ```rust,no_run
//! use privsearch_client::{Client, LineEmbedder, StreamTransport};
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").expect("Failed to connect to PrivSearch server");
//! let mut client = Client::connect(StreamTransport::new(stream)).expect("Client setup failed");
//! let mut embedder = LineEmbedder::spawn("python3", ["embedding.py"]).expect("Failed to spawn embedding process");
//!
//! let outcome = client.search("private information retrieval", &mut embedder).expect("Search failed");
//! for result in outcome.results {
//!     println!("[score {}] {}", result.score, result.url.unwrap_or_default());
//! }
//!
//! // Run the offline phase before the next query.
//! client.preprocess().expect("Offline phase failed");
//! ```
//!
//! See `examples/client.rs` for an interactive client.

mod client;
mod embedder;

pub use client::{Client, SearchOutcome, SearchResult, SessionState};
pub use embedder::{EmbeddingOracle, LineEmbedder, QueryEmbedding};
pub use privsearch_common::{
    error::{ErrorClass, PrivSearchError},
    hint::CorpusParams,
    wire::{StreamTransport, Transport},
};
