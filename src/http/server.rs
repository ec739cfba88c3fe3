//! HTTP host server.
//!
//! # Responsibilities
//! - Accept route registrations (verb, path template, options, handler)
//! - Fire route listeners so extensions can rewrite a route before it goes live
//! - Serve wire requests through the route's own hook pipeline
//! - Attach named capabilities for integrators to retrieve later
//! - Seal the router (tracing, timeout, request ID layers) and publish it to loopback handles
//! - Bind to a listener and serve until shutdown

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{DefaultBodyLimit, RawPathParams};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{ServerConfig, Strategy};
use crate::http::request::{new_request_id, parse_query};
use crate::http::response::internal_error;
use crate::http::{LiveConnection, Loopback, SentResponse, VirtualRequest, VirtualResponse, X_REQUEST_ID};
use crate::lifecycle::{runner, BoxError, Handler, Hooks};
use crate::observability::metrics;
use crate::routing::template::{PathParams, PathTemplate, TemplateError};

/// Supported route verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn method(&self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Delete => Method::DELETE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }

    fn filter(&self) -> MethodFilter {
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Put => MethodFilter::PUT,
            Verb::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("route {verb} {template} is already registered")]
    DuplicateRoute { verb: Verb, template: String },

    #[error("route {template} names its captures differently from {existing}")]
    ConflictingCaptures { template: String, existing: String },

    #[error("route {verb} {template} rejected: {source}")]
    Rejected {
        verb: Verb,
        template: String,
        source: BoxError,
    },

    #[error("capability '{0}' is already attached")]
    DuplicateCapability(String),
}

/// Per-route options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub hooks: Hooks,
    /// Expose the route as an in-process invoker under this (dotted) name.
    pub expose_as: Option<String>,
    /// Invocation strategy for the exposed invoker; the api default otherwise.
    pub strategy: Option<Strategy>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn expose_as(mut self, name: impl Into<String>) -> Self {
        self.expose_as = Some(name.into());
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// A route on its way to the router, as seen by route listeners.
#[derive(Debug)]
pub struct RouteRegistration {
    pub verb: Verb,
    pub template: PathTemplate,
    pub options: RouteOptions,
    pub handler: Handler,
}

/// Extension point fired once per registered route.
pub type RouteListener = Box<dyn FnMut(&mut RouteRegistration) -> Result<(), BoxError> + Send>;

/// The host server: axum router plus registration-time extension points.
pub struct HostServer {
    router: Router,
    config: ServerConfig,
    listeners: Vec<RouteListener>,
    installed: HashSet<(Verb, String)>,
    shapes: HashMap<String, String>,
    capabilities: HashMap<String, Arc<dyn Any + Send + Sync>>,
    loopback: Loopback,
}

impl HostServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            router: Router::new(),
            config,
            listeners: Vec::new(),
            installed: HashSet::new(),
            shapes: HashMap::new(),
            capabilities: HashMap::new(),
            loopback: Loopback::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Loopback handle; usable once the server is sealed.
    pub fn loopback(&self) -> Loopback {
        self.loopback.clone()
    }

    /// Register a listener fired for every route registered afterwards.
    pub fn on_route<F>(&mut self, listener: F)
    where
        F: FnMut(&mut RouteRegistration) -> Result<(), BoxError> + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Register a route. Listeners run first; if any rejects the route
    /// nothing is installed.
    pub fn route(
        &mut self,
        verb: Verb,
        template: &str,
        options: RouteOptions,
        handler: Handler,
    ) -> Result<(), ServerError> {
        let Admitted { template, key, path } = admit(&self.installed, &self.shapes, verb, template)?;

        let mut registration = RouteRegistration {
            verb,
            template,
            options,
            handler,
        };
        for listener in self.listeners.iter_mut() {
            listener(&mut registration).map_err(|source| ServerError::Rejected {
                verb,
                template: registration.template.to_string(),
                source,
            })?;
        }

        tracing::info!(
            verb = %verb,
            template = %registration.template,
            exposed = ?registration.options.expose_as,
            "Route registered"
        );
        metrics::record_registration(verb.as_str());

        let endpoint = wire_endpoint(registration, self.config.max_body_bytes);
        self.router = std::mem::take(&mut self.router).route(&path, endpoint);
        self.shapes.insert(key.1.clone(), path);
        self.installed.insert(key);
        Ok(())
    }

    /// Check that every route in `routes` could be registered, against the
    /// installed routes and each other, without installing any of them.
    pub fn check_routes<'a, I>(&self, routes: I) -> Result<(), ServerError>
    where
        I: IntoIterator<Item = (Verb, &'a str)>,
    {
        let mut installed = self.installed.clone();
        let mut shapes = self.shapes.clone();
        for (verb, template) in routes {
            let Admitted { key, path, .. } = admit(&installed, &shapes, verb, template)?;
            shapes.insert(key.1.clone(), path);
            installed.insert(key);
        }
        Ok(())
    }

    pub fn get<F, Fut>(&mut self, template: &str, options: RouteOptions, handler: F) -> Result<(), ServerError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.route(Verb::Get, template, options, Handler::new(handler))
    }

    pub fn post<F, Fut>(&mut self, template: &str, options: RouteOptions, handler: F) -> Result<(), ServerError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.route(Verb::Post, template, options, Handler::new(handler))
    }

    pub fn put<F, Fut>(&mut self, template: &str, options: RouteOptions, handler: F) -> Result<(), ServerError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.route(Verb::Put, template, options, Handler::new(handler))
    }

    pub fn delete<F, Fut>(&mut self, template: &str, options: RouteOptions, handler: F) -> Result<(), ServerError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.route(Verb::Delete, template, options, Handler::new(handler))
    }

    /// Attach a named capability.
    pub fn decorate<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> Result<(), ServerError> {
        if self.capabilities.contains_key(name) {
            return Err(ServerError::DuplicateCapability(name.to_string()));
        }
        self.capabilities.insert(name.to_string(), Arc::new(value));
        Ok(())
    }

    pub fn capability<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.capabilities.get(name).cloned()?.downcast::<T>().ok()
    }

    /// Seal the server: apply server-wide layers, publish the final router to
    /// every loopback handle and return it for serving.
    #[allow(deprecated)]
    pub fn into_router(self) -> Router {
        let router = self
            .router
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http());
        self.loopback.publish(router.clone());
        tracing::info!(routes = self.installed.len(), "Host server sealed");
        router
    }

    /// Seal and serve on `listener` until `shutdown` resolves.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let router = self.into_router();
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// A route that passed parsing and the duplicate checks.
struct Admitted {
    template: PathTemplate,
    key: (Verb, String),
    path: String,
}

fn admit(
    installed: &HashSet<(Verb, String)>,
    shapes: &HashMap<String, String>,
    verb: Verb,
    template: &str,
) -> Result<Admitted, ServerError> {
    let template = PathTemplate::parse(template)?;
    let path = template.router_path();
    let key = (verb, template.shape());
    if installed.contains(&key) {
        return Err(ServerError::DuplicateRoute {
            verb,
            template: template.to_string(),
        });
    }
    // The router keys captures by name: one shape, one spelling.
    if let Some(existing) = shapes.get(&key.1).filter(|existing| **existing != path) {
        return Err(ServerError::ConflictingCaptures {
            template: template.to_string(),
            existing: existing.clone(),
        });
    }
    Ok(Admitted { template, key, path })
}

/// A registered route as the wire sees it.
struct WireRoute {
    verb: Verb,
    hooks: Hooks,
    handler: Handler,
}

fn wire_endpoint(registration: RouteRegistration, body_limit: usize) -> MethodRouter {
    let route = Arc::new(WireRoute {
        verb: registration.verb,
        hooks: registration.options.hooks,
        handler: registration.handler,
    });
    let filter = route.verb.filter();
    on(
        filter,
        move |raw: Result<RawPathParams, RawPathParamsRejection>,
              uri: Uri,
              headers: HeaderMap,
              body: Bytes| {
            let route = route.clone();
            async move {
                let params = match raw {
                    Ok(raw) => raw
                        .iter()
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .collect(),
                    Err(RawPathParamsRejection::InvalidUtf8InPathParam(e)) => {
                        return e.into_response()
                    }
                    Err(_) => PathParams::new(),
                };
                route.serve(params, uri, headers, body).await
            }
        },
    )
    .layer(DefaultBodyLimit::max(body_limit))
}

impl WireRoute {
    async fn serve(&self, params: PathParams, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
        let request_id = headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(new_request_id);
        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        let request = VirtualRequest {
            request_id,
            method: self.verb.method(),
            url,
            params: params.clone(),
            query: parse_query(uri.query()),
            headers,
            body,
        };

        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::live(request.clone(), LiveConnection::new(tx));
        if let Err(e) = runner::drive(&self.hooks, &self.handler, params, request.clone(), reply).await {
            return internal_error(&e);
        }

        let SentResponse { payload, reply } = match rx.await {
            Ok(sent) => sent,
            Err(_) => {
                return internal_error(&"handler completed without sending a response".into());
            }
        };

        // A hook that hijacked before the handler gets its payload out as is.
        let post_send = reply.reached_handler();
        let payload = if post_send {
            match runner::apply_on_send(&self.hooks, &request, &reply, payload).await {
                Ok(payload) => payload,
                Err(e) => return internal_error(&e),
            }
        } else {
            payload
        };
        let response = SentResponse::into_response(reply.status(), reply.take_headers(), payload);
        if post_send {
            runner::apply_on_response(&self.hooks, &request, &reply).await;
        }
        response
    }
}
