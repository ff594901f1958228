mod body;
mod writers;

pub use writers::ResponseBody;

use crate::compress::{self, Encoding, ACCEPTED_ENCODINGS};
use crate::frame;
use crate::headers::{self, GRPC_ACCEPT_ENCODING, GRPC_ENCODING, GRPC_TIMEOUT};
use crate::interceptor::{BoxFuture, Interceptor, UnaryFn};
use crate::protocol::{self, CallSpec, ContentType, ACCEPT_POST, ACCEPT_POST_NO_JSON};
use crate::registry::Registrar;
use crate::status::{Code, RpcError};
use bytes::{Buf, Bytes};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, ALLOW, CONTENT_TYPE, TRAILER};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use prost::Message as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Messages a handler can carry: protobuf on the wire for the gRPC family,
/// serde for the JSON mode.
pub trait RpcMessage:
    prost::Message + Serialize + DeserializeOwned + Default + 'static
{
}

impl<T> RpcMessage for T where
    T: prost::Message + Serialize + DeserializeOwned + Default + 'static
{
}

/// Request body handed to a raw gRPC delegate.
pub type RawBody = BoxBody<Bytes, RpcError>;

/// Delegate that takes over a canonical gRPC exchange entirely, bypassing
/// unary framing. Used for bidirectional reflection.
pub type RawGrpcFn =
    Arc<dyn Fn(Request<RawBody>) -> BoxFuture<'static, Response<ResponseBody>> + Send + Sync>;

/// Plain-data handler options, resolved once at construction.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HandlerConfig {
    /// Never compress responses, regardless of what the client accepts.
    #[serde(default)]
    pub disable_gzip_response: bool,

    /// Treat `application/json` as an unknown content type.
    #[serde(default)]
    pub disable_json: bool,

    /// Per-message size bound (0 = unbounded). Applies to the declared
    /// frame length and to decompressed payloads.
    #[serde(default)]
    pub max_request_bytes: u64,

    /// Extra headers added to every RPC response.
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
}

/// Per-call context visible to interceptors and the application.
#[derive(Debug, Clone)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    spec: Arc<CallSpec>,
    headers: HeaderMap,
    deadline: Option<Instant>,
}

impl CallContext {
    pub(crate) fn new(
        spec: Arc<CallSpec>,
        headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Self {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        Self {
            inner: Arc::new(ContextInner {
                spec,
                headers,
                deadline,
            }),
        }
    }

    pub fn spec(&self) -> &CallSpec {
        &self.inner.spec
    }

    /// The request headers, including user-defined metadata.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn timeout_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

// The timer backend caps sleeps far below the 8-digit-hours ceiling the
// grpc-timeout grammar allows.
const MAX_ENFORCED_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Serves one unary RPC over gRPC, gRPC-Web, or JSON framing.
///
/// Safe for concurrent use; every call decodes into a fresh request
/// message.
pub struct UnaryHandler<Req, Res> {
    method: String,
    config: HandlerConfig,
    response_headers: HeaderMap,
    implementation: UnaryFn<Req, Res>,
    interceptor: Option<Arc<dyn Interceptor<Req, Res>>>,
    raw_grpc: Option<RawGrpcFn>,
}

impl<Req, Res> UnaryHandler<Req, Res>
where
    Req: RpcMessage,
    Res: RpcMessage,
{
    pub fn new(
        method: impl Into<String>,
        implementation: UnaryFn<Req, Res>,
        config: HandlerConfig,
    ) -> Self {
        let mut response_headers = HeaderMap::new();
        for (name, value) in &config.response_headers {
            match (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    response_headers.insert(name, value);
                }
                _ => warn!("skipping unrepresentable configured header {}", name),
            }
        }
        Self {
            method: method.into(),
            config,
            response_headers,
            implementation,
            interceptor: None,
            raw_grpc: None,
        }
    }

    /// Record this handler's method with a reflection registrar.
    pub fn with_registrar(self, registrar: &Registrar) -> Self {
        registrar.register(&self.method);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor<Req, Res>>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Install a delegate that takes over canonical gRPC exchanges.
    pub fn with_raw_grpc(mut self, delegate: RawGrpcFn) -> Self {
        self.raw_grpc = Some(delegate);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Serve one HTTP request as an RPC call, producing the complete
    /// response: headers, body, and trailers.
    pub async fn serve<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body + Send + Sync + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // Non-RPC rejections first, before any body work.
        if req.method() != Method::POST {
            drain(req.into_body()).await;
            return self.method_not_allowed();
        }

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| protocol::dispatch(v, self.config.disable_json));
        let Some(content_type) = content_type else {
            debug!("rejecting unsupported content type for {}", self.method);
            drain(req.into_body()).await;
            return self.unsupported_media_type();
        };

        if matches!(content_type, ContentType::Grpc | ContentType::GrpcProto) {
            if let Some(delegate) = &self.raw_grpc {
                debug!("delegating {} to the raw gRPC handler", self.method);
                let req = req.map(|b| {
                    b.map_frame(|frame| {
                        frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
                    })
                    .map_err(|err| RpcError::wrap(Code::Internal, err.into()))
                    .boxed()
                });
                return delegate(req).await;
            }
        }

        // A malformed deadline is deferred rather than written immediately
        // so the interceptor chain still observes the call.
        let mut deferred: Option<RpcError> = None;
        let mut call_timeout: Option<Duration> = None;
        if let Some(value) = req.headers().get(GRPC_TIMEOUT) {
            let raw = value.to_str().unwrap_or("");
            match headers::parse_timeout(raw) {
                Ok(timeout) => call_timeout = Some(timeout),
                Err(err) => {
                    deferred = Some(RpcError::new(
                        Code::InvalidArgument,
                        format!("protocol error: invalid grpc-timeout value {raw:?}: {err}"),
                    ));
                }
            }
        }

        let lpm = content_type.uses_lpm();
        let request_encoding = self.negotiate_request_encoding(req.headers(), lpm, &mut deferred);
        let response_encoding =
            self.negotiate_response_encoding(req.headers(), lpm, request_encoding);

        let spec = Arc::new(CallSpec {
            method: self.method.clone(),
            content_type,
            request_encoding,
            response_encoding,
        });
        debug!(
            "serving {} as {} (request: {}, response: {})",
            spec.method, spec.content_type, spec.request_encoding, spec.response_encoding
        );

        let (parts, body) = req.into_parts();
        let ctx = CallContext::new(Arc::clone(&spec), parts.headers, call_timeout);

        let request_message = if deferred.is_none() {
            let raw = match collect_body(body, self.read_limit(lpm, request_encoding)).await {
                Ok(raw) => raw,
                Err(err) => return self.write_error(&spec, err),
            };
            match self.decode_request(&spec, &raw) {
                Ok(message) => message,
                Err(err) => return self.write_error(&spec, err),
            }
        } else {
            drain(body).await;
            Req::default()
        };

        let implementation: UnaryFn<Req, Res> = match deferred {
            Some(err) => Arc::new(move |_ctx, _req| {
                let err = err.clone();
                Box::pin(async move { Err(err) })
            }),
            None => Arc::clone(&self.implementation),
        };
        let handler = match &self.interceptor {
            Some(interceptor) => interceptor.wrap(implementation),
            None => implementation,
        };

        let result = match call_timeout {
            Some(timeout) => {
                let enforced = timeout.min(MAX_ENFORCED_TIMEOUT);
                match tokio::time::timeout(enforced, handler(ctx, request_message)).await {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::new(
                        Code::DeadlineExceeded,
                        "the operation timed out",
                    )),
                }
            }
            None => handler(ctx, request_message).await,
        };

        match result {
            Ok(message) => self.write_success(&spec, &message),
            Err(err) => self.write_error(&spec, err),
        }
    }

    fn negotiate_request_encoding(
        &self,
        headers: &HeaderMap,
        lpm: bool,
        deferred: &mut Option<RpcError>,
    ) -> Encoding {
        let header = if lpm { GRPC_ENCODING } else { "content-encoding" };
        let Some(value) = headers.get(header) else {
            return Encoding::Identity;
        };
        let value = value.to_str().unwrap_or("");
        match Encoding::parse(value) {
            Some(encoding) => encoding,
            None => {
                if deferred.is_none() {
                    *deferred = Some(RpcError::new(
                        Code::Unimplemented,
                        format!(
                            "unknown compression {value:?}: supported encodings are {ACCEPTED_ENCODINGS}"
                        ),
                    ));
                }
                Encoding::Identity
            }
        }
    }

    fn negotiate_response_encoding(
        &self,
        headers: &HeaderMap,
        lpm: bool,
        request_encoding: Encoding,
    ) -> Encoding {
        if self.config.disable_gzip_response {
            return Encoding::Identity;
        }
        if lpm {
            // Symmetric with the request unless the client states a
            // preference.
            let mut encoding = request_encoding;
            if let Some(accept) = headers.get(GRPC_ACCEPT_ENCODING).and_then(|v| v.to_str().ok())
            {
                if let Some(preferred) = headers::negotiate_accept_encoding(accept) {
                    encoding = preferred;
                }
            }
            encoding
        } else {
            let accepts_gzip = headers
                .get(ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .and_then(headers::negotiate_accept_encoding)
                == Some(Encoding::Gzip);
            if accepts_gzip {
                Encoding::Gzip
            } else {
                Encoding::Identity
            }
        }
    }

    /// Cap on raw body bytes buffered from the wire. Compressed requests
    /// get headroom up to the worst-case gzip size of a maximal message.
    fn read_limit(&self, lpm: bool, request_encoding: Encoding) -> usize {
        let max = self.config.max_request_bytes;
        if max == 0 {
            return usize::MAX;
        }
        let payload_cap = match request_encoding {
            Encoding::Identity => max,
            Encoding::Gzip => compress::gzip_max_compressed_size(max),
        };
        let total = if lpm {
            payload_cap.saturating_add(frame::PREFIX_LEN as u64)
        } else {
            payload_cap
        };
        usize::try_from(total).unwrap_or(usize::MAX)
    }

    fn decode_request(&self, spec: &CallSpec, raw: &Bytes) -> Result<Req, RpcError> {
        let max = self.config.max_request_bytes;
        if spec.content_type.is_json() {
            if spec.request_encoding == Encoding::Gzip {
                let decompressed = compress::gzip_decompress(raw, max)?;
                frame::read_json(&decompressed)
            } else {
                frame::read_json(raw)
            }
        } else {
            let payload = frame::read_message(raw, spec.request_encoding, max)?;
            Req::decode(payload).map_err(|err| {
                RpcError::new(
                    Code::InvalidArgument,
                    format!("invalid protobuf request: {err}"),
                )
            })
        }
    }

    fn write_success(&self, spec: &CallSpec, message: &Res) -> Response<ResponseBody> {
        let headers = self.prelude(spec);
        if spec.content_type.is_json() {
            match frame::write_json(message) {
                Ok(payload) => writers::json_success(
                    headers,
                    payload,
                    spec.response_encoding == Encoding::Gzip,
                ),
                Err(err) => writers::json_error(headers, &err),
            }
        } else {
            match frame::write_message(&message.encode_to_vec(), spec.response_encoding) {
                Ok(framed) => writers::grpc_success(spec, headers, framed),
                Err(err) => writers::grpc_error(spec, headers, &err),
            }
        }
    }

    fn write_error(&self, spec: &CallSpec, err: RpcError) -> Response<ResponseBody> {
        debug!("{} failed: {}", spec.method, err);
        let headers = self.prelude(spec);
        if spec.content_type.is_json() {
            writers::json_error(headers, &err)
        } else {
            writers::grpc_error(spec, headers, &err)
        }
    }

    /// Response headers shared by every RPC outcome: the echoed content
    /// type, the gRPC negotiation headers, declared trailers, and any
    /// configured extras.
    fn prelude(&self, spec: &CallSpec) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(spec.content_type.as_str()),
        );
        if spec.content_type.uses_lpm() {
            headers.insert(
                HeaderName::from_static(GRPC_ACCEPT_ENCODING),
                HeaderValue::from_static(ACCEPTED_ENCODINGS),
            );
            headers.insert(
                HeaderName::from_static(GRPC_ENCODING),
                HeaderValue::from_static(spec.response_encoding.as_str()),
            );
            if spec.content_type.is_web() {
                headers.insert(
                    HeaderName::from_static("access-control-expose-headers"),
                    HeaderValue::from_static("grpc-status,grpc-message"),
                );
            } else {
                // Declared up front so HTTP/1.1 intermediaries forward the
                // status trailers.
                headers.insert(
                    TRAILER,
                    HeaderValue::from_static(
                        "grpc-status,grpc-message,grpc-status-details-bin",
                    ),
                );
            }
        }
        for (name, value) in &self.response_headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn method_not_allowed(&self) -> Response<ResponseBody> {
        let mut headers = HeaderMap::new();
        headers.insert(ALLOW, HeaderValue::from_static("POST"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        writers::respond(
            StatusCode::METHOD_NOT_ALLOWED,
            headers,
            writers::full_body("Method Not Allowed"),
        )
    }

    fn unsupported_media_type(&self) -> Response<ResponseBody> {
        let accept = if self.config.disable_json {
            ACCEPT_POST_NO_JSON
        } else {
            ACCEPT_POST
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("accept-post"),
            HeaderValue::from_static(accept),
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        writers::respond(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            headers,
            writers::full_body("Unsupported Media Type"),
        )
    }
}

/// Buffer the whole request body, failing with ResourceExhausted past the
/// limit.
async fn collect_body<B>(body: B, limit: usize) -> Result<Bytes, RpcError>
where
    B: Body + Send + Sync + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                Err(RpcError::new(
                    Code::ResourceExhausted,
                    "request body exceeds configured message size limit",
                ))
            } else {
                Err(RpcError::new(
                    Code::Internal,
                    format!("error reading request body: {err}"),
                ))
            }
        }
    }
}

/// Consume whatever is left of a request body so the connection can be
/// reused.
async fn drain<B>(body: B)
where
    B: Body + Send + Sync + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut body = Box::pin(body);
    while let Some(frame) = body.frame().await {
        if frame.is_err() {
            break;
        }
    }
}
