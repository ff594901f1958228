use crate::status::{Code, RpcError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Message encodings accepted on either direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Identity,
    Gzip,
}

/// Wire spelling of the accepted encodings, used in negotiation errors and
/// the `grpc-accept-encoding` response header.
pub const ACCEPTED_ENCODINGS: &str = "gzip,identity";

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
        }
    }

    pub fn parse(value: &str) -> Option<Encoding> {
        match value {
            "identity" => Some(Encoding::Identity),
            "gzip" => Some(Encoding::Gzip),
            _ => None,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("corrupt gzip payload: {0}")]
    Corrupt(#[from] std::io::Error),
    #[error("decompressed message exceeds {limit} byte limit")]
    TooLarge { limit: u64 },
}

impl From<DecompressError> for RpcError {
    fn from(err: DecompressError) -> Self {
        let code = match err {
            DecompressError::Corrupt(_) => Code::InvalidArgument,
            DecompressError::TooLarge { .. } => Code::ResourceExhausted,
        };
        RpcError::wrap(code, err)
    }
}

/// Compress bytes with gzip.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Upper bound on the gzip-compressed size of `n` input bytes: stored
/// deflate blocks (5 bytes per 16383-byte block) plus the gzip header and
/// trailer.
pub fn gzip_max_compressed_size(n: u64) -> u64 {
    n + n / 16_383 * 5 + 5 + 18
}

/// Decompress a gzip payload, refusing output beyond `max_bytes`
/// (0 = unbounded).
pub fn gzip_decompress(data: &[u8], max_bytes: u64) -> Result<Vec<u8>, DecompressError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    if max_bytes > 0 {
        (&mut decoder)
            .take(max_bytes.saturating_add(1))
            .read_to_end(&mut out)?;
        if out.len() as u64 > max_bytes {
            return Err(DecompressError::TooLarge { limit: max_bytes });
        }
    } else {
        decoder.read_to_end(&mut out)?;
    }
    Ok(out)
}
