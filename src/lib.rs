pub mod compress;
pub mod frame;
pub mod handler;
pub mod headers;
pub mod interceptor;
pub mod protocol;
pub mod registry;
pub mod status;

pub use compress::Encoding;
pub use handler::{
    CallContext, HandlerConfig, RawBody, RawGrpcFn, ResponseBody, RpcMessage, UnaryHandler,
};
pub use interceptor::{unary_fn, Interceptor, InterceptorChain, UnaryFn};
pub use protocol::{CallSpec, ContentType};
pub use registry::Registrar;
pub use status::{Code, RpcError, Status};
