use crate::compress::{self, Encoding};
use crate::status::{Code, RpcError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bytes of the `[flags][length]` prefix on every length-prefixed message.
pub const PREFIX_LEN: usize = 5;

/// Flags bit marking a compressed message payload.
pub const COMPRESSED_FLAG: u8 = 0b0000_0001;

/// Flags bit marking a gRPC-Web trailer frame.
pub const TRAILER_FLAG: u8 = 0b1000_0000;

/// Decode the single length-prefixed message of a unary request body.
///
/// Enforces `max_bytes` (0 = unbounded) against the declared length of
/// plain frames and the decompressed payload of compressed ones.
pub fn read_message(body: &[u8], encoding: Encoding, max_bytes: u64) -> Result<Bytes, RpcError> {
    if body.is_empty() {
        return Err(RpcError::new(
            Code::InvalidArgument,
            "protocol error: missing length-prefixed message",
        ));
    }
    if body.len() < PREFIX_LEN {
        return Err(RpcError::new(
            Code::InvalidArgument,
            "protocol error: truncated message prefix",
        ));
    }

    let flags = body[0];
    if flags & !COMPRESSED_FLAG != 0 {
        return Err(RpcError::new(
            Code::InvalidArgument,
            format!("protocol error: unexpected frame flags {flags:#04x}"),
        ));
    }

    let length = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let payload = &body[PREFIX_LEN..];
    if payload.len() < length {
        return Err(RpcError::new(
            Code::InvalidArgument,
            "protocol error: truncated message payload",
        ));
    }
    if payload.len() > length {
        return Err(RpcError::new(
            Code::InvalidArgument,
            "protocol error: unexpected bytes after message",
        ));
    }

    if flags & COMPRESSED_FLAG != 0 {
        if encoding == Encoding::Identity {
            return Err(RpcError::new(
                Code::InvalidArgument,
                "protocol error: compressed message sent without compression support",
            ));
        }
        let decompressed = compress::gzip_decompress(payload, max_bytes)?;
        Ok(Bytes::from(decompressed))
    } else {
        if max_bytes > 0 && length as u64 > max_bytes {
            return Err(RpcError::new(
                Code::ResourceExhausted,
                format!("message size {length} exceeds {max_bytes} byte limit"),
            ));
        }
        Ok(Bytes::copy_from_slice(payload))
    }
}

/// Frame one message for the wire. Non-empty payloads are compressed and
/// flagged when the response encoding is gzip.
pub fn write_message(payload: &[u8], encoding: Encoding) -> Result<Bytes, RpcError> {
    let (flags, data) = if encoding == Encoding::Gzip && !payload.is_empty() {
        let compressed = compress::gzip_compress(payload).map_err(|err| {
            RpcError::wrap(Code::Internal, err)
        })?;
        (COMPRESSED_FLAG, std::borrow::Cow::Owned(compressed))
    } else {
        (0, std::borrow::Cow::Borrowed(payload))
    };

    let mut frame = BytesMut::with_capacity(PREFIX_LEN + data.len());
    frame.put_u8(flags);
    frame.put_u32(data.len() as u32);
    frame.extend_from_slice(&data);
    Ok(frame.freeze())
}

/// Encode trailers as the in-body frame gRPC-Web uses in place of HTTP
/// trailers: flag byte 0x80, big-endian length, `name: value` lines.
pub fn write_trailer_frame(trailers: &[(&str, String)]) -> Bytes {
    let mut block = BytesMut::new();
    for (name, value) in trailers {
        block.extend_from_slice(name.as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(value.as_bytes());
        block.extend_from_slice(b"\r\n");
    }

    let mut frame = BytesMut::with_capacity(PREFIX_LEN + block.len());
    frame.put_u8(TRAILER_FLAG);
    frame.put_u32(block.len() as u32);
    frame.extend_from_slice(&block);
    frame.freeze()
}

/// Decode a JSON request body. Unknown fields are tolerated for forward
/// compatibility.
pub fn read_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(body)
        .map_err(|err| RpcError::new(Code::InvalidArgument, format!("invalid JSON request: {err}")))
}

/// Encode a JSON response body.
pub fn write_json<T: Serialize>(message: &T) -> Result<Vec<u8>, RpcError> {
    serde_json::to_vec(message).map_err(|err| {
        RpcError::new(
            Code::Internal,
            format!("error marshaling JSON response: {err}"),
        )
    })
}
