use super::body::GrpcBody;
use crate::compress;
use crate::frame;
use crate::headers::{self, GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS_BIN};
use crate::protocol::CallSpec;
use crate::status::{Code, RpcError};
use bytes::{Bytes, BytesMut};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, CONTENT_ENCODING};
use hyper::{HeaderMap, Response, StatusCode};
use prost::Message as _;
use tracing::warn;

/// The body type of every handler response.
pub type ResponseBody = BoxBody<Bytes, hyper::Error>;

#[inline]
pub(crate) fn full_body<T: Into<Bytes>>(content: T) -> ResponseBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn respond(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// JSON success: 200, optionally gzip-compressed unless some upstream
/// layer already claimed `content-encoding`.
pub(crate) fn json_success(
    mut headers: HeaderMap,
    payload: Vec<u8>,
    gzip: bool,
) -> Response<ResponseBody> {
    let payload = if gzip && !headers.contains_key(CONTENT_ENCODING) {
        match compress::gzip_compress(&payload) {
            Ok(compressed) => {
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                compressed
            }
            Err(err) => {
                warn!("response compression failed, sending identity: {}", err);
                payload
            }
        }
    } else {
        payload
    };
    respond(StatusCode::OK, headers, full_body(payload))
}

/// JSON error: HTTP status from the code mapping, body is the JSON form
/// of the status.
pub(crate) fn json_error(headers: HeaderMap, err: &RpcError) -> Response<ResponseBody> {
    let status = err.to_status();
    let (http_status, payload) = match serde_json::to_vec(&status) {
        Ok(payload) => (err.code().http_status(), payload),
        Err(marshal_err) => {
            warn!("error marshaling status: {}", marshal_err);
            let fallback = format!(
                r#"{{"code":{},"message":"error marshaling status with code {}"}}"#,
                Code::Internal.as_i32(),
                err.code().as_i32()
            );
            (StatusCode::INTERNAL_SERVER_ERROR, fallback.into_bytes())
        }
    };
    respond(http_status, headers, full_body(payload))
}

/// gRPC success: one framed message, then OK trailers.
pub(crate) fn grpc_success(
    spec: &CallSpec,
    headers: HeaderMap,
    message: Bytes,
) -> Response<ResponseBody> {
    let trailers = vec![
        (GRPC_STATUS, "0".to_string()),
        (GRPC_MESSAGE, String::new()),
        (GRPC_STATUS_DETAILS_BIN, String::new()),
    ];
    grpc_response(spec, headers, message, trailers)
}

/// gRPC error: the HTTP status stays 200; the status rides entirely in
/// trailers.
pub(crate) fn grpc_error(
    spec: &CallSpec,
    headers: HeaderMap,
    err: &RpcError,
) -> Response<ResponseBody> {
    grpc_response(spec, headers, Bytes::new(), error_trailers(err))
}

fn error_trailers(err: &RpcError) -> Vec<(&'static str, String)> {
    let mut buf = Vec::new();
    match err.to_status().encode(&mut buf) {
        Ok(()) => vec![
            (GRPC_STATUS, err.code().as_i32().to_string()),
            (GRPC_MESSAGE, headers::percent_encode(err.message())),
            (GRPC_STATUS_DETAILS_BIN, headers::encode_bin(&buf)),
        ],
        Err(marshal_err) => {
            warn!("error marshaling status details: {}", marshal_err);
            let message = format!("error marshaling status with code {}", err.code().as_i32());
            vec![
                (GRPC_STATUS, Code::Internal.as_i32().to_string()),
                (GRPC_MESSAGE, headers::percent_encode(&message)),
            ]
        }
    }
}

fn grpc_response(
    spec: &CallSpec,
    headers: HeaderMap,
    message: Bytes,
    trailers: Vec<(&'static str, String)>,
) -> Response<ResponseBody> {
    if spec.content_type.is_web() {
        // gRPC-Web carries trailers in-band as a flagged frame.
        let trailer_frame = frame::write_trailer_frame(&trailers);
        let mut body = BytesMut::with_capacity(message.len() + trailer_frame.len());
        body.extend_from_slice(&message);
        body.extend_from_slice(&trailer_frame);
        respond(StatusCode::OK, headers, full_body(body.freeze()))
    } else {
        let mut trailer_map = HeaderMap::with_capacity(trailers.len());
        for (name, value) in trailers {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    trailer_map.insert(HeaderName::from_static(name), value);
                }
                Err(_) => warn!("dropping unrepresentable trailer {}", name),
            }
        }
        respond(
            StatusCode::OK,
            headers,
            GrpcBody::new(message, trailer_map).boxed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Encoding;
    use crate::protocol::ContentType;
    use prost::Message as _;

    fn spec(content_type: ContentType) -> CallSpec {
        CallSpec {
            method: "test.Service/Call".to_string(),
            content_type,
            request_encoding: Encoding::Identity,
            response_encoding: Encoding::Identity,
        }
    }

    async fn read_frames(body: ResponseBody) -> (Bytes, Option<HeaderMap>) {
        let mut body = body;
        let mut data = BytesMut::new();
        let mut trailers = None;
        while let Some(frame) = body.frame().await {
            let frame = frame.unwrap();
            if frame.is_data() {
                data.extend_from_slice(&frame.into_data().unwrap());
            } else {
                trailers = frame.into_trailers().ok();
            }
        }
        (data.freeze(), trailers)
    }

    #[tokio::test]
    async fn test_grpc_error_trailers_round_trip() {
        let err = RpcError::new(Code::PermissionDenied, "no access").with_detail(
            prost_types::Any {
                type_url: "type.googleapis.com/test.Reason".to_string(),
                value: vec![1, 2, 3],
            },
        );
        let response = grpc_error(&spec(ContentType::Grpc), HeaderMap::new(), &err);
        assert_eq!(response.status(), StatusCode::OK);

        let (data, trailers) = read_frames(response.into_body()).await;
        assert!(data.is_empty());
        let trailers = trailers.unwrap();
        assert_eq!(trailers.get(GRPC_STATUS).unwrap(), "7");
        assert_eq!(
            trailers.get(GRPC_MESSAGE).unwrap(),
            "no access"
        );

        let bin = trailers.get(GRPC_STATUS_DETAILS_BIN).unwrap().to_str().unwrap();
        let decoded =
            crate::status::Status::decode(headers::decode_bin(bin).unwrap().as_slice()).unwrap();
        let recovered = RpcError::from(decoded);
        assert_eq!(recovered.code(), Code::PermissionDenied);
        assert_eq!(recovered.message(), "no access");
        assert_eq!(recovered.details(), err.details());
    }

    #[tokio::test]
    async fn test_web_error_is_in_body() {
        let err = RpcError::new(Code::NotFound, "missing");
        let response = grpc_error(&spec(ContentType::GrpcWeb), HeaderMap::new(), &err);

        let (data, trailers) = read_frames(response.into_body()).await;
        assert!(trailers.is_none());
        assert_eq!(data[0], frame::TRAILER_FLAG);
        let text = String::from_utf8_lossy(&data[frame::PREFIX_LEN..]).into_owned();
        assert!(text.contains("grpc-status: 5\r\n"));
        assert!(text.contains("grpc-message: missing\r\n"));
    }

    #[tokio::test]
    async fn test_json_error_status_and_body() {
        let err = RpcError::new(Code::Unauthenticated, "who are you");
        let response = json_error(HeaderMap::new(), &err);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (data, _) = read_frames(response.into_body()).await;
        let json: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(json, serde_json::json!({"code": 16, "message": "who are you"}));
    }

    #[tokio::test]
    async fn test_json_success_skips_gzip_when_encoding_claimed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));

        let response = json_success(headers, b"{}".to_vec(), true);
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "br");

        let (data, _) = read_frames(response.into_body()).await;
        assert_eq!(data.as_ref(), b"{}");
    }
}
