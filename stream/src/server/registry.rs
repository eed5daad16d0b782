use super::ServerFacts;
use crate::stream::{ServerStream, StreamCore};
use rustc_hash::FxHashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use strand_rpc_core::{Codec, context::CallContext, error::StreamError};

/// The call shape of a registered method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl MethodKind {
    /// Whether the Open frame carries the whole inbound side
    #[inline]
    pub fn request_in_open(&self) -> bool {
        matches!(self, Self::Unary | Self::ServerStreaming)
    }
}

/// Resolves to the payload of the End frame, or the error of the Error frame
pub(crate) type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StreamError>> + Send>>;

type HandlerFn<F> =
    Box<dyn Fn(Arc<StreamCore<F>>, Option<Vec<u8>>) -> HandlerFuture + Send + Sync>;

pub(crate) struct Method<F: ServerFacts> {
    kind: MethodKind,
    handler: HandlerFn<F>,
}

impl<F: ServerFacts> Method<F> {
    #[inline]
    pub(crate) fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Bind the handler to a fresh stream, the open payload is the request of unary and
    /// server-streaming calls.
    #[inline]
    pub(crate) fn call(&self, core: Arc<StreamCore<F>>, payload: Option<Vec<u8>>) -> HandlerFuture {
        (self.handler)(core, payload)
    }
}

fn decode_request<F: ServerFacts, Req: DeserializeOwned>(
    core: &StreamCore<F>, payload: Option<Vec<u8>>,
) -> Result<Req, StreamError> {
    let Some(payload) = payload else {
        return Err(StreamError::Decode);
    };
    core.codec().decode(&payload).map_err(|_| StreamError::Decode)
}

/// Method name to handler, built once per server and shared by all connections.
///
/// Handlers return `Err(EndOfStream)` the same as `Ok`.
pub struct ServiceRegistry<F: ServerFacts> {
    methods: FxHashMap<String, Method<F>>,
}

impl<F: ServerFacts> ServiceRegistry<F> {
    pub fn new() -> Self {
        Self { methods: FxHashMap::default() }
    }

    fn register(mut self, name: &str, kind: MethodKind, handler: HandlerFn<F>) -> Self {
        if self.methods.insert(name.to_string(), Method { kind, handler }).is_some() {
            warn!("method {} registered twice, the last one wins", name);
        }
        self
    }

    /// `handler(ctx, req) -> resp`
    pub fn unary<Req, Resp, H, Fut>(self, name: &str, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, StreamError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let f = move |core: Arc<StreamCore<F>>, payload: Option<Vec<u8>>| -> HandlerFuture {
            let handler = handler.clone();
            Box::pin(async move {
                let req: Req = decode_request(&core, payload)?;
                let resp = (*handler)(core.ctx().clone(), req).await?;
                core.codec().encode(&resp).map(Some).map_err(|_| StreamError::Encode)
            })
        };
        self.register(name, MethodKind::Unary, Box::new(f))
    }

    /// `handler(req, stream)`, the stream only sends.
    pub fn server_streaming<Req, Resp, H, Fut>(self, name: &str, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(Req, ServerStream<F, Req, Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let f = move |core: Arc<StreamCore<F>>, payload: Option<Vec<u8>>| -> HandlerFuture {
            let handler = handler.clone();
            Box::pin(async move {
                let req: Req = decode_request(&core, payload)?;
                (*handler)(req, ServerStream::from_core(core)).await.map(|_| None)
            })
        };
        self.register(name, MethodKind::ServerStreaming, Box::new(f))
    }

    /// `handler(stream)`, the optional initial message is the first one received.
    pub fn client_streaming<Req, Resp, H, Fut>(self, name: &str, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(ServerStream<F, Req, Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        self.register(name, MethodKind::ClientStreaming, Self::stream_handler(handler))
    }

    /// `handler(stream)`, the optional initial message is the first one received.
    pub fn bidi_streaming<Req, Resp, H, Fut>(self, name: &str, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(ServerStream<F, Req, Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        self.register(name, MethodKind::BidiStreaming, Self::stream_handler(handler))
    }

    fn stream_handler<Req, Resp, H, Fut>(handler: H) -> HandlerFn<F>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(ServerStream<F, Req, Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        Box::new(move |core: Arc<StreamCore<F>>, _payload: Option<Vec<u8>>| -> HandlerFuture {
            let fut = handler(ServerStream::from_core(core));
            Box::pin(async move { fut.await.map(|_| None) })
        })
    }

    #[inline]
    pub(crate) fn get(&self, name: &str) -> Option<&Method<F>> {
        self.methods.get(name)
    }

    #[inline]
    pub fn kind_of(&self, name: &str) -> Option<MethodKind> {
        self.methods.get(name).map(|m| m.kind)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.methods.len()
    }
}

impl<F: ServerFacts> fmt::Debug for ServiceRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.methods.keys().collect();
        names.sort();
        write!(f, "registry{:?}", names)
    }
}
