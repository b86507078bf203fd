//! End-to-end tests of PrivSearch, spanning server and client. Benchmarks live under `benches`.

#[cfg(test)]
mod test_search;
