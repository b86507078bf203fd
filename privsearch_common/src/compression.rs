use crate::{error::PrivSearchError, params::URL_DELIM};
use flate2::{Compression, Decompress, FlushDecompress, Status, write::ZlibEncoder};
use std::io::Write;
use tracing::debug;

/// Joins the URLs of one subcluster, ready to be compressed as a single blob.
pub fn join_urls<S: AsRef<str>>(urls: &[S]) -> String {
    urls.iter().map(|u| u.as_ref()).collect::<Vec<&str>>().join(URL_DELIM)
}

/// Splits a recovered blob back into its URLs.
pub fn split_urls(text: &str) -> Vec<&str> {
    text.split(URL_DELIM).collect()
}

pub fn compress(text: &str) -> Result<Vec<u8>, PrivSearchError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(text.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inflates a complete zlib stream. Bytes following the end of the stream are ignored, a truncated stream is an error.
fn decompress(bytes: &[u8]) -> Result<String, PrivSearchError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(4).max(64));

    loop {
        let consumed = (inflater.total_in() as usize).min(bytes.len());
        let status = inflater
            .decompress_vec(&bytes[consumed..], &mut out, FlushDecompress::None)
            .map_err(|_| PrivSearchError::DecompressionFailed)?;

        match status {
            Status::StreamEnd => break,
            _ if out.len() == out.capacity() => out.reserve(out.capacity()),
            _ => return Err(PrivSearchError::DecompressionFailed),
        }
    }

    String::from_utf8(out).map_err(|_| PrivSearchError::DecompressionFailed)
}

/// Decompresses a blob read back from fixed-width database rows, which may carry trailing padding. On failure the last
/// byte is dropped and decompression retried, until it succeeds or nothing is left. Trailing NUL characters are
/// stripped from the result.
pub fn decompress_with_retry(bytes: &[u8]) -> Result<String, PrivSearchError> {
    let mut end = bytes.len();

    while end > 0 {
        match decompress(&bytes[..end]) {
            Ok(text) => {
                if end < bytes.len() {
                    debug!(dropped = bytes.len() - end, "Recovered compressed chunk after trimming");
                }
                return Ok(text.trim_end_matches('\0').to_string());
            }
            Err(_) => end -= 1,
        }
    }

    Err(PrivSearchError::DecompressionFailed)
}

/// Interprets an uncompressed blob, stripping trailing padding.
pub fn decode_plain(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}
