//! Lifecycle hook registration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::http::{Payload, VirtualRequest, VirtualResponse};
use crate::lifecycle::BoxError;

/// Stages a hook can attach to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    /// Request received, before anything else.
    OnRequest,
    /// Just before the handler.
    PreHandler,
    /// Payload sent; hooks may transform it.
    OnSend,
    /// Response finalized.
    OnResponse,
}

impl HookStage {
    pub const ORDER: [HookStage; 4] = [
        HookStage::OnRequest,
        HookStage::PreHandler,
        HookStage::OnSend,
        HookStage::OnResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::OnRequest => "on_request",
            HookStage::PreHandler => "pre_handler",
            HookStage::OnSend => "on_send",
            HookStage::OnResponse => "on_response",
        }
    }
}

pub(crate) type RequestHook =
    Arc<dyn Fn(VirtualRequest, VirtualResponse) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub(crate) type SendHook = Arc<
    dyn Fn(VirtualRequest, VirtualResponse, Payload) -> BoxFuture<'static, Result<Payload, BoxError>>
        + Send
        + Sync,
>;

/// Hooks for one route, grouped by stage.
#[derive(Clone, Default)]
pub struct Hooks {
    on_request: Vec<RequestHook>,
    pre_handler: Vec<RequestHook>,
    on_send: Vec<SendHook>,
    on_response: Vec<RequestHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_request.push(request_hook(hook));
        self
    }

    pub fn pre_handler<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.pre_handler.push(request_hook(hook));
        self
    }

    /// Add a payload transformer. Transformers compose in registration order.
    pub fn on_send<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(VirtualRequest, VirtualResponse, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, BoxError>> + Send + 'static,
    {
        self.on_send
            .push(Arc::new(move |req, reply, payload| hook(req, reply, payload).boxed()));
        self
    }

    /// Add a side-effect hook run after the response is finalized.
    pub fn on_response<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_response.push(request_hook(hook));
        self
    }

    pub fn len(&self, stage: HookStage) -> usize {
        match stage {
            HookStage::OnRequest => self.on_request.len(),
            HookStage::PreHandler => self.pre_handler.len(),
            HookStage::OnSend => self.on_send.len(),
            HookStage::OnResponse => self.on_response.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        HookStage::ORDER.iter().all(|stage| self.len(*stage) == 0)
    }

    /// Hooks of a request-shaped stage. `OnSend` has its own accessor.
    pub(crate) fn stage(&self, stage: HookStage) -> &[RequestHook] {
        match stage {
            HookStage::OnRequest => &self.on_request,
            HookStage::PreHandler => &self.pre_handler,
            HookStage::OnResponse => &self.on_response,
            HookStage::OnSend => &[],
        }
    }

    pub(crate) fn send_stage(&self) -> &[SendHook] {
        &self.on_send
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_request", &self.on_request.len())
            .field("pre_handler", &self.pre_handler.len())
            .field("on_send", &self.on_send.len())
            .field("on_response", &self.on_response.len())
            .finish()
    }
}

fn request_hook<F, Fut>(hook: F) -> RequestHook
where
    F: Fn(VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |req, reply| hook(req, reply).boxed())
}
