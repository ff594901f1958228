use crate::handler::CallContext;
use crate::status::RpcError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The uniform unary call contract: context plus decoded request in,
/// response or error out. Interceptors consume one and produce another.
pub type UnaryFn<Req, Res> =
    Arc<dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Res, RpcError>> + Send + Sync>;

/// Lift an async function into a [`UnaryFn`].
pub fn unary_fn<Req, Res, F, Fut>(f: F) -> UnaryFn<Req, Res>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, RpcError>> + Send + 'static,
{
    Arc::new(move |ctx, req| Box::pin(f(ctx, req)))
}

/// A wrapper around a unary call. Wrapping is the whole interface: an
/// interceptor sees the call on the way in and the result on the way out.
pub trait Interceptor<Req, Res>: Send + Sync {
    fn wrap(&self, next: UnaryFn<Req, Res>) -> UnaryFn<Req, Res>;
}

/// Composes interceptors so the first in the list is outermost: it sees
/// the call first and the response last.
pub struct InterceptorChain<Req, Res> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Res>>>,
}

impl<Req, Res> InterceptorChain<Req, Res> {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor<Req, Res>>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl<Req, Res> Interceptor<Req, Res> for InterceptorChain<Req, Res>
where
    Req: 'static,
    Res: 'static,
{
    fn wrap(&self, next: UnaryFn<Req, Res>) -> UnaryFn<Req, Res> {
        self.interceptors
            .iter()
            .rev()
            .fold(next, |handler, interceptor| interceptor.wrap(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Encoding;
    use crate::protocol::{CallSpec, ContentType};
    use crate::status::Code;
    use hyper::HeaderMap;
    use parking_lot::Mutex;

    fn test_context() -> CallContext {
        CallContext::new(
            Arc::new(CallSpec {
                method: "test.Service/Call".to_string(),
                content_type: ContentType::Grpc,
                request_encoding: Encoding::Identity,
                response_encoding: Encoding::Identity,
            }),
            HeaderMap::new(),
            None,
        )
    }

    struct Labeler {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor<String, String> for Labeler {
        fn wrap(&self, next: UnaryFn<String, String>) -> UnaryFn<String, String> {
            let label = self.label;
            let log = Arc::clone(&self.log);
            Arc::new(move |ctx, req| {
                let log = Arc::clone(&log);
                let next = Arc::clone(&next);
                Box::pin(async move {
                    log.lock().push(format!("{label} enter"));
                    let result = next(ctx, req).await;
                    log.lock().push(format!("{label} exit"));
                    result
                })
            })
        }
    }

    #[tokio::test]
    async fn test_chain_is_onion_shaped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            Arc::new(Labeler {
                label: "outer",
                log: Arc::clone(&log),
            }) as Arc<dyn Interceptor<String, String>>,
            Arc::new(Labeler {
                label: "inner",
                log: Arc::clone(&log),
            }),
        ]);

        let handler = chain.wrap(unary_fn(|_ctx, req: String| async move { Ok(req) }));
        let reply = handler(test_context(), "hi".to_string()).await.unwrap();

        assert_eq!(reply, "hi");
        assert_eq!(
            *log.lock(),
            vec!["outer enter", "inner enter", "inner exit", "outer exit"]
        );
    }

    #[tokio::test]
    async fn test_interceptor_observes_errors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![Arc::new(Labeler {
            label: "observer",
            log: Arc::clone(&log),
        }) as Arc<dyn Interceptor<String, String>>]);

        let handler = chain.wrap(unary_fn(|_ctx, _req: String| async move {
            Err(RpcError::new(Code::NotFound, "nothing here"))
        }));
        let err = handler(test_context(), "hi".to_string()).await.unwrap_err();

        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(*log.lock(), vec!["observer enter", "observer exit"]);
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let chain: InterceptorChain<String, String> = InterceptorChain::new(Vec::new());
        assert!(chain.is_empty());

        let handler = chain.wrap(unary_fn(|_ctx, req: String| async move { Ok(req) }));
        assert_eq!(
            handler(test_context(), "echo".to_string()).await.unwrap(),
            "echo"
        );
    }
}
