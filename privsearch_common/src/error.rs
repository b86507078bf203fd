use thiserror::Error;

/// Coarse classification of failures, deciding how far an error is allowed to propagate.
///
/// * `Configuration` - detected while building a database or setting up a session. Nothing is served.
/// * `Protocol` - fatal to the current client session, never to the shared server state.
/// * `Transient` - locally retried before being reported.
/// * `Io` - transport, codec or filesystem trouble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Protocol,
    Transient,
    Io,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum PrivSearchError {
    // Matrix
    #[error("The number of rows and columns in the matrix must be non-zero.")]
    InvalidMatrixDimension,
    #[error("The matrix dimensions do not allow multiplication.")]
    IncompatibleDimensionForMatrixMultiplication,
    #[error("The matrix dimensions do not allow addition or subtraction.")]
    IncompatibleDimensionForMatrixAddition,
    #[error("The matrix must have 'rows * columns' elements.")]
    InvalidNumberOfElementsInMatrix,
    #[error("The dimensions are incompatible for multiplication of a row vector and a transposed matrix.")]
    IncompatibleDimensionForRowVectorTransposedMatrixMultiplication,
    #[error("A vector must have either one row or one column.")]
    InvalidDimensionForVector,

    // Corpus and configuration
    #[error("Corpus is empty")]
    EmptyCorpus,
    #[error("Corpus embedding dimension does not match expected: {found} vs. {expected}")]
    EmbeddingDimensionMismatch { expected: u64, found: u64 },
    #[error("Malformed corpus record: {0}")]
    MalformedCorpusRecord(String),
    #[error("Slot bit width {0} is not supported, embeddings are represented as at most 8-bit values")]
    UnsupportedSlotBitWidth(u32),
    #[error("Cluster {0} appears more than once in the corpus")]
    DuplicateCluster(u64),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Packing and database layout
    #[error("No chunks given to pack")]
    NoChunks,
    #[error("Inner products may wrap around: plaintext modulus {modulus} must exceed {bound}")]
    InnerProductMayWrap { modulus: u64, bound: u64 },
    #[error("Populated database extent {found} does not match expected {expected}")]
    PopulatedExtentMismatch { expected: u64, found: u64 },

    // PIR
    #[error("Plaintext modulus {0} must be a power of two, smaller than the ciphertext modulus")]
    InvalidPlaintextModulus(u64),
    #[error("Value {value} at database cell {index} is not below the plaintext modulus")]
    ValueExceedsPlaintextModulus { index: u64, value: u64 },
    #[error("Parameters admit decryption failures: {0}")]
    NoiseBudgetExceeded(String),
    #[error("Unexpected dimension of PIR message, expected {expected} elements, found {found}")]
    InvalidMessageLength { expected: u64, found: u64 },
    #[error("Client hint does not match the database description")]
    InvalidHint,
    #[error("No preprocessed secret is available, run the offline phase first")]
    NoPreprocessedSecret,
    #[error("Offline phase has not completed for the pending secret")]
    HintNotRecovered,
    #[error("No query is awaiting an answer")]
    NoPendingQuery,
    #[error("Database column {column} is out of range, database has {num_cols} columns")]
    ColumnOutOfRange { column: u64, num_cols: u64 },

    // Protocol and session
    #[error("Hint section '{0}' is missing")]
    MissingHintSection(&'static str),
    #[error("Cluster {0} is not indexed by this corpus")]
    ClusterOutOfRange(u64),
    #[error("Document {document} is out of range for cluster {cluster}")]
    DocumentOutOfRange { cluster: u64, document: u64 },
    #[error("Cluster {0} has no indexed documents")]
    EmptyChunkSet(u64),
    #[error("Both index maps must have the same length: {embeddings} vs. {urls}")]
    IndexMapLengthMismatch { embeddings: u64, urls: u64 },
    #[error("Session is in state '{found}', operation requires '{expected}'")]
    UnexpectedSessionState { expected: &'static str, found: &'static str },
    #[error("Unexpected response kind '{0}'")]
    UnexpectedResponse(&'static str),
    #[error("Database '{0}' is not served here")]
    DatabaseNotServed(&'static str),
    #[error("Server failed to answer: {0}")]
    ServerFailure(String),
    #[error("Embedding inference failed: {0}")]
    EmbeddingInference(String),

    // Transient
    #[error("Compressed URL chunk could not be recovered")]
    DecompressionFailed,

    // Codec and IO
    #[error("Serialization failed with: {0}")]
    Serialization(String),
    #[error("Deserialization failed with: {0}")]
    Deserialization(String),
    #[error("I/O failed with: {0}")]
    Io(String),
    #[error("Frame of {len} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { len: u64, limit: u64 },
}

impl PrivSearchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyCorpus
            | Self::EmbeddingDimensionMismatch { .. }
            | Self::MalformedCorpusRecord(_)
            | Self::UnsupportedSlotBitWidth(_)
            | Self::DuplicateCluster(_)
            | Self::InvalidConfig(_)
            | Self::NoChunks
            | Self::InnerProductMayWrap { .. }
            | Self::PopulatedExtentMismatch { .. }
            | Self::InvalidPlaintextModulus(_)
            | Self::ValueExceedsPlaintextModulus { .. }
            | Self::NoiseBudgetExceeded(_)
            | Self::MissingHintSection(_)
            | Self::InvalidMatrixDimension
            | Self::InvalidNumberOfElementsInMatrix => ErrorClass::Configuration,

            Self::DecompressionFailed => ErrorClass::Transient,

            Self::Serialization(_) | Self::Deserialization(_) | Self::Io(_) | Self::FrameTooLarge { .. } => ErrorClass::Io,

            _ => ErrorClass::Protocol,
        }
    }
}

impl From<std::io::Error> for PrivSearchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
