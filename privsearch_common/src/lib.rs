//! Common building blocks of PrivSearch, a private web search service built on single-server LWE **P**rivate **I**nformation **R**etrieval (PIR).
//!
//! A client learns the most relevant document for its query, and the URL of that document, while the servers learn neither.
//! This crate holds everything shared between the PrivSearch server and client crates:
//!
//! * The LWE PIR scheme, generic over the ciphertext ring, with point queries, linear (inner product) queries and an offline,
//!   query-independent preprocessing phase.
//! * The greedy first-fit-decreasing packing of variable-sized chunks into database columns.
//! * Bookkeeping between semantic identifiers (cluster, subcluster, document) and flat database coordinates.
//! * Scoring of recovered inner products, URL compression, wire messages and deployment configuration.
//!
//! You'll typically not depend on this crate directly, but on `privsearch_server` or `privsearch_client`, which re-export what they need.

pub mod branch_opt_util;
pub mod compression;
pub mod config;
pub mod elem;
pub mod error;
pub mod hint;
pub mod index;
pub mod matrix;
pub mod packing;
pub mod params;
pub mod pir;
pub mod scoring;
pub mod wire;
