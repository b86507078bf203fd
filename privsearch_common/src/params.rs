pub const BIT_SECURITY_LEVEL: usize = 128;
pub const SEED_BYTE_LEN: usize = (2 * BIT_SECURITY_LEVEL) / 8;

/// Row capacity estimate of the embeddings database is `hint size * EMBEDDINGS_ROW_SCALE`.
pub const EMBEDDINGS_ROW_SCALE: u64 = 125;
/// Row capacity estimate of the URL database is `max(hint size * URLS_ROW_SCALE, max chunk bytes * URLS_BYTES_SCALE)`.
pub const URLS_ROW_SCALE: u64 = 250;
pub const URLS_BYTES_SCALE: u64 = 1;

/// One URL database record holds a single byte.
pub const URLS_PLAINTEXT_MODULUS: u64 = 1 << 8;

pub const MAX_SLOT_BITS: u32 = 8;

/// Marks the start of a new subcluster within a cluster's record stream.
pub const SUBCLUSTER_DELIM: &str = "-----";
/// Separates the URLs of one subcluster before compression.
pub const URL_DELIM: &str = "\n";
/// URLs longer than this are replaced by `URL_PLACEHOLDER`.
pub const MAX_URL_LEN: usize = 500;
pub const URL_PLACEHOLDER: &str = "0000";

/// Separates a record's URL from its embedding in a corpus line.
pub const RECORD_FIELD_DELIM: char = '\t';
pub const EMBEDDING_VALUE_DELIM: char = ',';

/// Number of ranked results reported per search.
pub const NUM_REPORTED_RESULTS: usize = 10;

/// TurboSHAKE128 domain separator used for expanding the public matrix `A` of a database.
pub const PUBLIC_MATRIX_DOMAIN: u8 = 0x1f;
/// TurboSHAKE128 domain separator used for expanding the offline-phase matrix `B`.
pub const HINT_MATRIX_DOMAIN: u8 = 0x0b;
