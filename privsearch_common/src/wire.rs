use crate::{
    branch_opt_util,
    error::PrivSearchError,
    hint::HintBundle,
    pir::{Answer, HintAnswer, HintQuery, Query},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io::{Read, Write};

/// Largest frame accepted by [`read_frame`]. Responses carrying a hint bundle can be this large.
pub const MAX_FRAME_BYTE_LEN: usize = 1 << 31;
/// Fixed encoding overhead of any request: enum and option tags, plus the shape of every carried vector.
pub const REQUEST_ENVELOPE_BYTE_LEN: usize = 256;

/// Offline-phase request, one encrypted secret per served database.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingRequest {
    pub embeddings: Option<HintQuery<u64>>,
    pub urls: Option<HintQuery<u32>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingAnswer {
    pub embeddings: Option<HintAnswer<u64>>,
    pub urls: Option<HintAnswer<u32>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    GetHint,
    ApplyHint(PreprocessingRequest),
    EmbeddingsAnswer(Query<u64>),
    UrlsAnswer(Query<u32>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Hint(Box<HintBundle>),
    HintAnswer(PreprocessingAnswer),
    EmbeddingsAnswer(Answer<u64>),
    UrlsAnswer(Answer<u32>),
    /// The request could not be served. The server keeps running.
    Failure(String),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetHint => "get-hint",
            Request::ApplyHint(_) => "apply-hint",
            Request::EmbeddingsAnswer(_) => "embeddings-answer",
            Request::UrlsAnswer(_) => "urls-answer",
        }
    }
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Hint(_) => "hint",
            Response::HintAnswer(_) => "hint-answer",
            Response::EmbeddingsAnswer(_) => "embeddings-answer",
            Response::UrlsAnswer(_) => "urls-answer",
            Response::Failure(_) => "failure",
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PrivSearchError> {
    bincode::serialize(value).map_err(|e| PrivSearchError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PrivSearchError> {
    bincode::deserialize(bytes).map_err(|e| PrivSearchError::Deserialization(e.to_string()))
}

/// Writes one frame: a 4 -bytes little-endian length, followed by the payload.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), PrivSearchError> {
    let len = u32::try_from(payload.len()).map_err(|_| PrivSearchError::Serialization(format!("frame of {} bytes is too large", payload.len())))?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;

    Ok(())
}

/// Payload length announced by a frame header. Lengths above `limit` are rejected before anything gets allocated.
pub fn frame_len(header: [u8; 4], limit: usize) -> Result<usize, PrivSearchError> {
    let len = u32::from_le_bytes(header) as usize;
    if branch_opt_util::unlikely(len > limit) {
        return Err(PrivSearchError::FrameTooLarge { len: len as u64, limit: limit as u64 });
    }
    Ok(len)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, PrivSearchError> {
    read_frame_limited(reader, MAX_FRAME_BYTE_LEN)
}

/// Reads one frame whose payload is at most `limit` bytes long.
pub fn read_frame_limited<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>, PrivSearchError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;

    let mut payload = vec![0u8; frame_len(header, limit)?];
    reader.read_exact(&mut payload)?;

    Ok(payload)
}

/// Synchronous request/response delivery to a search server. A round trip blocks until answered, it is never retried.
pub trait Transport {
    fn round_trip(&mut self, request: Request) -> Result<Response, PrivSearchError>;

    /// Releases any held connection.
    fn close(&mut self) {}
}

/// [`Transport`] over any byte stream, exchanging bincode-encoded messages in length-prefixed frames.
pub struct StreamTransport<S: Read + Write> {
    stream: Option<S>,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> StreamTransport<S> {
        StreamTransport { stream: Some(stream) }
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn round_trip(&mut self, request: Request) -> Result<Response, PrivSearchError> {
        let stream = self.stream.as_mut().ok_or_else(|| PrivSearchError::Io(String::from("connection is closed")))?;

        write_frame(stream, &encode(&request)?)?;
        decode(&read_frame(stream)?)
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
