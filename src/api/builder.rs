//! Route-tree builder.
//!
//! Walks a `SpecTree` depth first, registers every endpoint with the host
//! server and places its invoker and metadata at the same dotted path.
//! Exposure itself happens in a route listener, so routes registered
//! directly on the server with `expose_as` land in the same trees.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::invoker::InvokerParts;
use crate::api::{Api, BuildError, Invoker, InvokerTree, MetadataTree};
use crate::config::ApiConfig;
use crate::http::{HostServer, Loopback, RouteOptions, RouteRegistration, ServerError, Verb};
use crate::http::{VirtualRequest, VirtualResponse};
use crate::lifecycle::{BoxError, Handler};
use crate::routing::template::PathParams;
use crate::routing::{Endpoint, NamePath, RouteMeta, SpecTree, Verbs};

/// State shared between the builder and its route listener.
struct Registry {
    config: ApiConfig,
    loopback: Loopback,
    body_limit: usize,
    client: InvokerTree,
    meta: MetadataTree,
    sealed: bool,
}

impl Registry {
    fn expose(&mut self, name: &str, registration: &mut RouteRegistration) -> Result<(), BuildError> {
        if self.sealed {
            return Err(BuildError::Sealed {
                name: name.to_string(),
            });
        }
        let path = NamePath::parse(name).ok_or_else(|| BuildError::InvalidName(name.to_string()))?;
        if self.client.vacant(&path).is_err() || self.meta.vacant(&path).is_err() {
            return Err(BuildError::NameCollision {
                path: path.to_string(),
            });
        }

        let strategy = registration.options.strategy.unwrap_or(self.config.strategy);
        let handler = registration.handler.instrumented(name);
        registration.handler = handler.clone();

        let invoker = Invoker::new(InvokerParts {
            name: path.to_string(),
            verb: registration.verb,
            template: registration.template.clone(),
            hooks: registration.options.hooks.clone(),
            handler,
            strategy,
            loopback: self.loopback.clone(),
            body_limit: self.body_limit,
        });
        let meta = RouteMeta::new(registration.verb, registration.template.as_str());

        let collision = |_| BuildError::NameCollision {
            path: path.to_string(),
        };
        self.client.insert(&path, invoker).map_err(collision)?;
        self.meta.insert(&path, meta).map_err(collision)?;

        tracing::info!(
            name = %path,
            verb = %registration.verb,
            template = %registration.template,
            strategy = strategy.as_str(),
            "Endpoint exposed"
        );
        Ok(())
    }
}

/// Collects endpoints into the invoker and metadata trees until `finish`.
pub struct ApiBuilder {
    registry: Arc<Mutex<Registry>>,
}

impl ApiBuilder {
    /// Install the route listener on `server`. From now on every route
    /// registered with `expose_as` becomes an invoker.
    pub fn install(server: &mut HostServer, config: ApiConfig) -> Self {
        let registry = Arc::new(Mutex::new(Registry {
            config,
            loopback: server.loopback(),
            body_limit: server.config().max_body_bytes,
            client: InvokerTree::new(),
            meta: MetadataTree::new(),
            sealed: false,
        }));

        let shared = registry.clone();
        server.on_route(move |registration| {
            let Some(name) = registration.options.expose_as.clone() else {
                return Ok(());
            };
            let mut registry = shared.lock().expect("api registry mutex poisoned");
            registry.expose(&name, registration).map_err(BoxError::from)
        });

        Self { registry }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("api registry mutex poisoned")
    }

    /// Register a whole declaration. Every name, template and route is
    /// checked before the first route is registered, so a rejected
    /// declaration leaves the server and both trees untouched.
    pub fn define<F>(&mut self, server: &mut HostServer, setter: F) -> Result<&mut Self, BuildError>
    where
        F: FnOnce(&Verbs) -> SpecTree,
    {
        let spec = setter(&Verbs);
        let mut planned = Vec::new();
        plan(spec, &NamePath::root(), None, &mut planned)?;

        {
            let registry = self.registry();
            if registry.sealed {
                let name = planned.first().map(|(path, _)| path.to_string()).unwrap_or_default();
                return Err(BuildError::Sealed { name });
            }
            let mut staged = MetadataTree::new();
            for (path, endpoint) in &planned {
                let meta = RouteMeta::new(endpoint.verb, endpoint.template.clone());
                if registry.meta.vacant(path).is_err() || staged.insert(path, meta).is_err() {
                    return Err(BuildError::NameCollision {
                        path: path.to_string(),
                    });
                }
            }
        }
        server
            .check_routes(planned.iter().map(|(_, e)| (e.verb, e.template.as_str())))
            .map_err(BuildError::Registration)?;

        for (path, endpoint) in planned {
            self.register(server, endpoint.expose_as(path.to_string()))?;
        }
        Ok(self)
    }

    /// Register one endpoint at the top level, named by its explicit name or
    /// its handler.
    pub fn register(&mut self, server: &mut HostServer, endpoint: Endpoint) -> Result<&mut Self, BuildError> {
        let name = endpoint
            .own_name()
            .map(str::to_string)
            .ok_or_else(|| BuildError::MissingName {
                template: endpoint.template.clone(),
            })?;
        let Endpoint {
            verb,
            template,
            options,
            handler,
        } = endpoint;
        let options = RouteOptions {
            expose_as: Some(name),
            ..options
        };
        server
            .route(verb, &template, options, handler)
            .map_err(registration_error)?;
        Ok(self)
    }

    pub fn get<F, Fut>(
        &mut self,
        server: &mut HostServer,
        template: &str,
        options: RouteOptions,
        handler: F,
    ) -> Result<&mut Self, BuildError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.single(server, Verb::Get, template, options, Handler::new(handler))
    }

    pub fn post<F, Fut>(
        &mut self,
        server: &mut HostServer,
        template: &str,
        options: RouteOptions,
        handler: F,
    ) -> Result<&mut Self, BuildError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.single(server, Verb::Post, template, options, Handler::new(handler))
    }

    pub fn put<F, Fut>(
        &mut self,
        server: &mut HostServer,
        template: &str,
        options: RouteOptions,
        handler: F,
    ) -> Result<&mut Self, BuildError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.single(server, Verb::Put, template, options, Handler::new(handler))
    }

    pub fn delete<F, Fut>(
        &mut self,
        server: &mut HostServer,
        template: &str,
        options: RouteOptions,
        handler: F,
    ) -> Result<&mut Self, BuildError>
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.single(server, Verb::Delete, template, options, Handler::new(handler))
    }

    fn single(
        &mut self,
        server: &mut HostServer,
        verb: Verb,
        template: &str,
        options: RouteOptions,
        handler: Handler,
    ) -> Result<&mut Self, BuildError> {
        self.register(server, Endpoint::from_handler(verb, template, handler).options(options))
    }

    /// Freeze both trees and attach the api to the server under
    /// `api.decorate_as`. Later exposures fail with `Sealed`.
    pub fn finish(self, server: &mut HostServer) -> Result<Api, BuildError> {
        let (api, decorate_as) = {
            let mut registry = self.registry();
            registry.sealed = true;
            let client = std::mem::take(&mut registry.client);
            let meta = std::mem::take(&mut registry.meta);
            (Api::new(client, meta), registry.config.decorate_as.clone())
        };

        server.decorate(&decorate_as, api.clone())?;
        tracing::info!(
            endpoints = api.client().len(),
            decorate_as = %decorate_as,
            "Api sealed"
        );
        Ok(api)
    }
}

impl std::fmt::Debug for ApiBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("ApiBuilder")
            .field("endpoints", &registry.client.leaf_paths())
            .field("sealed", &registry.sealed)
            .finish()
    }
}

/// Flatten a declaration into `(path, endpoint)` pairs in declaration order.
///
/// Naming: an explicit name wins, then the handler's identifier, then the
/// namespace key holding the endpoint. Dotted explicit names are absolute.
fn plan(
    spec: SpecTree,
    scope: &NamePath,
    key: Option<&str>,
    out: &mut Vec<(NamePath, Endpoint)>,
) -> Result<(), BuildError> {
    match spec {
        SpecTree::Endpoint(endpoint) => {
            let path = endpoint_path(&endpoint, scope, key)?;
            out.push((path, endpoint));
        }
        SpecTree::List(endpoints) => {
            for endpoint in endpoints {
                let path = endpoint_path(&endpoint, scope, None)?;
                out.push((path, endpoint));
            }
        }
        SpecTree::Namespace(entries) => {
            for (name, child) in entries {
                match child {
                    SpecTree::Endpoint(_) => plan(child, scope, Some(&name), out)?,
                    nested => {
                        let inner = scope
                            .child(&name)
                            .ok_or_else(|| BuildError::InvalidName(name.clone()))?;
                        plan(nested, &inner, None, out)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn endpoint_path(endpoint: &Endpoint, scope: &NamePath, key: Option<&str>) -> Result<NamePath, BuildError> {
    let name = endpoint
        .own_name()
        .or(key)
        .ok_or_else(|| BuildError::MissingName {
            template: endpoint.template.clone(),
        })?;

    let path = if name.contains('.') {
        NamePath::parse(name)
    } else {
        scope.child(name)
    };
    path.ok_or_else(|| BuildError::InvalidName(name.to_string()))
}

/// Unwrap a listener rejection back into the builder error that caused it.
fn registration_error(error: ServerError) -> BuildError {
    match error {
        ServerError::Rejected {
            verb,
            template,
            source,
        } => match source.downcast::<BuildError>() {
            Ok(build) => *build,
            Err(source) => BuildError::Registration(ServerError::Rejected {
                verb,
                template,
                source,
            }),
        },
        other => BuildError::Registration(other),
    }
}
