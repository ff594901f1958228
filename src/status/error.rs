use super::Code;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::ser::SerializeStruct;
use std::fmt;
use std::sync::Arc;

/// A structured RPC error: a status code, a human-readable message, an
/// optional underlying cause, and zero or more typed detail payloads.
///
/// The message never repeats the code name; writers combine the two when
/// they put the error on the wire.
#[derive(Debug, Clone)]
pub struct RpcError {
    code: Code,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    details: Vec<prost_types::Any>,
}

impl RpcError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            details: Vec::new(),
        }
    }

    /// Wrap an underlying error, keeping it reachable through `source()`.
    /// The wire message is taken from the cause's display form.
    pub fn wrap(code: Code, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        let source = source.into();
        Self {
            code,
            message: source.to_string(),
            source: Some(Arc::from(source)),
            details: Vec::new(),
        }
    }

    /// Wrap an error that carries no status of its own.
    pub fn unknown(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::wrap(Code::Unknown, source)
    }

    /// Attach a typed detail payload.
    pub fn with_detail(mut self, detail: prost_types::Any) -> Self {
        self.details.push(detail);
        self
    }

    #[inline]
    pub fn code(&self) -> Code {
        self.code
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn details(&self) -> &[prost_types::Any] {
        &self.details
    }

    pub fn to_status(&self) -> Status {
        Status {
            code: self.code.as_i32(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn std::error::Error + 'static))
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        Self {
            code: Code::from_i32(status.code),
            message: status.message,
            source: None,
            details: status.details,
        }
    }
}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        Status {
            code: err.code.as_i32(),
            message: err.message,
            details: err.details,
        }
    }
}

/// The on-wire form of an error: binary protobuf in gRPC trailers, JSON in
/// the JSON mode.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

// Proto field names, details rendered as {type_url, value: <base64>}.
// Rendering the packed message itself would need a descriptor registry,
// which lives outside this crate.
impl serde::Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(serde::Serialize)]
        struct AnyJson<'a> {
            type_url: &'a str,
            value: String,
        }

        let fields = if self.details.is_empty() { 2 } else { 3 };
        let mut state = serializer.serialize_struct("Status", fields)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if !self.details.is_empty() {
            let details: Vec<AnyJson<'_>> = self
                .details
                .iter()
                .map(|any| AnyJson {
                    type_url: &any.type_url,
                    value: STANDARD.encode(&any.value),
                })
                .collect();
            state.serialize_field("details", &details)?;
        }
        state.end()
    }
}
