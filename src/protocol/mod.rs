use crate::compress::Encoding;

const CONTENT_TYPE_GRPC: &str = "application/grpc";
const CONTENT_TYPE_GRPC_PROTO: &str = "application/grpc+proto";
const CONTENT_TYPE_GRPC_WEB: &str = "application/grpc-web";
const CONTENT_TYPE_GRPC_WEB_PROTO: &str = "application/grpc-web+proto";
const CONTENT_TYPE_JSON: &str = "application/json";

/// The content types a handler accepts, advertised on 415 rejections.
pub const ACCEPT_POST: &str = "application/grpc,application/grpc+proto,application/json";

/// Same, with JSON disabled by configuration.
pub const ACCEPT_POST_NO_JSON: &str = "application/grpc,application/grpc+proto";

/// The closed set of content types the handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Grpc,
    GrpcProto,
    GrpcWeb,
    GrpcWebProto,
    Json,
}

impl ContentType {
    /// Match a `content-type` header value, ignoring parameters such as
    /// `charset`.
    pub fn parse(value: &str) -> Option<ContentType> {
        match value.split(';').next().unwrap_or("").trim() {
            CONTENT_TYPE_GRPC => Some(ContentType::Grpc),
            CONTENT_TYPE_GRPC_PROTO => Some(ContentType::GrpcProto),
            CONTENT_TYPE_GRPC_WEB => Some(ContentType::GrpcWeb),
            CONTENT_TYPE_GRPC_WEB_PROTO => Some(ContentType::GrpcWebProto),
            CONTENT_TYPE_JSON => Some(ContentType::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Grpc => CONTENT_TYPE_GRPC,
            ContentType::GrpcProto => CONTENT_TYPE_GRPC_PROTO,
            ContentType::GrpcWeb => CONTENT_TYPE_GRPC_WEB,
            ContentType::GrpcWebProto => CONTENT_TYPE_GRPC_WEB_PROTO,
            ContentType::Json => CONTENT_TYPE_JSON,
        }
    }

    /// Whether bodies in this mode carry length-prefixed messages. True for
    /// the whole gRPC family, false for JSON.
    #[inline]
    pub fn uses_lpm(&self) -> bool {
        !matches!(self, ContentType::Json)
    }

    #[inline]
    pub fn is_web(&self) -> bool {
        matches!(self, ContentType::GrpcWeb | ContentType::GrpcWebProto)
    }

    #[inline]
    pub fn is_json(&self) -> bool {
        matches!(self, ContentType::Json)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Select the protocol for an incoming request from its `content-type`.
/// Returns None for unknown types, and for JSON when it is disabled.
pub fn dispatch(content_type: &str, disable_json: bool) -> Option<ContentType> {
    match ContentType::parse(content_type) {
        Some(ContentType::Json) if disable_json => None,
        other => other,
    }
}

/// The per-call descriptor: everything negotiation resolved, immutable for
/// the rest of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    pub method: String,
    pub content_type: ContentType,
    pub request_encoding: Encoding,
    pub response_encoding: Encoding,
}
