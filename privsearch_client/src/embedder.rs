use privsearch_common::error::PrivSearchError;
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};
use tracing::debug;

/// Embedding of a query text, along with the cluster it is nearest to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEmbedding {
    #[serde(rename = "Cluster_index")]
    pub cluster_index: u64,
    #[serde(rename = "Emb")]
    pub embedding: Vec<i8>,
}

/// Turns query text into a quantized embedding and a cluster id. Inference itself happens elsewhere.
pub trait EmbeddingOracle {
    fn embed(&mut self, text: &str) -> Result<QueryEmbedding, PrivSearchError>;
}

impl<F> EmbeddingOracle for F
where
    F: FnMut(&str) -> Result<QueryEmbedding, PrivSearchError>,
{
    fn embed(&mut self, text: &str) -> Result<QueryEmbedding, PrivSearchError> {
        self(text)
    }
}

/// Talks to an embedding process over a line-oriented channel: the query text goes out as one line, one JSON object
/// `{"Cluster_index": .., "Emb": [..]}` comes back as one line.
pub struct LineEmbedder<W: Write, R: BufRead> {
    input: W,
    output: R,
    child: Option<Child>,
}

impl<W: Write, R: BufRead> LineEmbedder<W, R> {
    pub fn new(input: W, output: R) -> LineEmbedder<W, R> {
        LineEmbedder { input, output, child: None }
    }
}

impl LineEmbedder<ChildStdin, BufReader<ChildStdout>> {
    /// Spawns `program` and talks to it over its standard input and output.
    pub fn spawn<S, I, A>(program: S, args: I) -> Result<Self, PrivSearchError>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut child = Command::new(program).args(args).stdin(Stdio::piped()).stdout(Stdio::piped()).spawn()?;

        let input = child
            .stdin
            .take()
            .ok_or_else(|| PrivSearchError::EmbeddingInference(String::from("no stdin on embedding process")))?;
        let output = child
            .stdout
            .take()
            .ok_or_else(|| PrivSearchError::EmbeddingInference(String::from("no stdout on embedding process")))?;

        debug!(pid = child.id(), "Spawned embedding process");
        Ok(LineEmbedder {
            input,
            output: BufReader::new(output),
            child: Some(child),
        })
    }
}

impl<W: Write, R: BufRead> EmbeddingOracle for LineEmbedder<W, R> {
    fn embed(&mut self, text: &str) -> Result<QueryEmbedding, PrivSearchError> {
        // One query per line.
        let text = text.replace(['\n', '\r'], " ");

        writeln!(self.input, "{}", text)?;
        self.input.flush()?;

        let mut line = String::new();
        if self.output.read_line(&mut line)? == 0 {
            return Err(PrivSearchError::EmbeddingInference(String::from("embedding process closed its output")));
        }

        serde_json::from_str(line.trim()).map_err(|e| PrivSearchError::EmbeddingInference(e.to_string()))
    }
}

impl<W: Write, R: BufRead> Drop for LineEmbedder<W, R> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod test {
    use super::{EmbeddingOracle, LineEmbedder, QueryEmbedding};
    use privsearch_common::error::PrivSearchError;
    use std::io::Cursor;

    #[test]
    fn replies_are_parsed_line_by_line() {
        let replies = "{\"Cluster_index\": 3, \"Emb\": [1, -2, 7]}\n{\"Cluster_index\":0,\"Emb\":[0]}\n";
        let mut sent = Vec::new();

        {
            let mut embedder = LineEmbedder::new(&mut sent, Cursor::new(replies));

            assert_eq!(
                embedder.embed("rust\nprivate search"),
                Ok(QueryEmbedding {
                    cluster_index: 3,
                    embedding: vec![1, -2, 7],
                })
            );
            assert_eq!(embedder.embed("second").map(|q| q.cluster_index), Ok(0));
            assert!(matches!(embedder.embed("third"), Err(PrivSearchError::EmbeddingInference(_))));
        }

        assert_eq!(String::from_utf8(sent).expect("Queries must be UTF-8"), "rust private search\nsecond\nthird\n");
    }

    #[test]
    fn malformed_reply_is_an_inference_failure() {
        let mut embedder = LineEmbedder::new(Vec::new(), Cursor::new("{\"Emb\": \"nope\"}\n"));
        assert!(matches!(embedder.embed("query"), Err(PrivSearchError::EmbeddingInference(_))));
    }

    #[test]
    fn closures_are_oracles() {
        let mut oracle = |text: &str| {
            Ok::<_, PrivSearchError>(QueryEmbedding {
                cluster_index: text.len() as u64,
                embedding: vec![],
            })
        };
        assert_eq!(oracle.embed("four").map(|q| q.cluster_index), Ok(4));
    }
}
