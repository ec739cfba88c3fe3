//! Declarative endpoint specifications.

use std::future::Future;

use crate::config::Strategy;
use crate::http::{RouteOptions, Verb, VirtualRequest, VirtualResponse};
use crate::lifecycle::{BoxError, Handler, Hooks};
use crate::routing::template::PathParams;

/// One endpoint: verb, path template, handler and options.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) verb: Verb,
    pub(crate) template: String,
    pub(crate) options: RouteOptions,
    pub(crate) handler: Handler,
}

impl Endpoint {
    pub fn new<F, Fut>(verb: Verb, template: impl Into<String>, handler: F) -> Self
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::from_handler(verb, template, Handler::new(handler))
    }

    pub fn from_handler(verb: Verb, template: impl Into<String>, handler: Handler) -> Self {
        Self {
            verb,
            template: template.into(),
            options: RouteOptions::default(),
            handler,
        }
    }

    pub fn options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.options.hooks = hooks;
        self
    }

    /// Explicit exposed name. A dotted name is an absolute path from the root.
    pub fn expose_as(mut self, name: impl Into<String>) -> Self {
        self.options.expose_as = Some(name.into());
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.options.strategy = Some(strategy);
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// The explicit name if set, else the handler's identifier.
    pub fn own_name(&self) -> Option<&str> {
        self.options
            .expose_as
            .as_deref()
            .or_else(|| self.handler.name())
    }
}

/// A declaration of endpoints to register and expose.
#[derive(Debug, Clone)]
pub enum SpecTree {
    /// A single endpoint. Inside a namespace its key names it unless the
    /// endpoint carries a name of its own.
    Endpoint(Endpoint),
    /// Named children, registered in declaration order.
    Namespace(Vec<(String, SpecTree)>),
    /// Siblings at the current level, each named by itself.
    List(Vec<Endpoint>),
}

impl SpecTree {
    pub fn namespace<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, SpecTree)>,
        K: Into<String>,
    {
        SpecTree::Namespace(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        SpecTree::List(endpoints.into_iter().collect())
    }
}

impl From<Endpoint> for SpecTree {
    fn from(endpoint: Endpoint) -> Self {
        SpecTree::Endpoint(endpoint)
    }
}

impl From<Vec<Endpoint>> for SpecTree {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        SpecTree::List(endpoints)
    }
}

/// Builder primitives handed to a definition closure, one per verb.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbs;

impl Verbs {
    pub fn get<F, Fut>(&self, template: &str, handler: F) -> Endpoint
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Endpoint::new(Verb::Get, template, handler)
    }

    pub fn post<F, Fut>(&self, template: &str, handler: F) -> Endpoint
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Endpoint::new(Verb::Post, template, handler)
    }

    pub fn put<F, Fut>(&self, template: &str, handler: F) -> Endpoint
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Endpoint::new(Verb::Put, template, handler)
    }

    pub fn delete<F, Fut>(&self, template: &str, handler: F) -> Endpoint
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Endpoint::new(Verb::Delete, template, handler)
    }
}
