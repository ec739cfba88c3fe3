//! Demo service for dual-route.
//!
//! Registers the same endpoints twice over: as wire routes and as in-process
//! invokers. Every `/invoke/...` route calls one of the invokers from inside
//! a wire handler and relays the structured result as JSON. `GET /` serves
//! the metadata tree.
//!
//! ```text
//! GET /1/method                  exposed as `method`
//! GET /2/method/:id              exposed as `methodWithParams`
//! GET /3/nested/method/:id       exposed as `nested.method`
//! GET /4/method                  exposed by handler name
//! GET /5/...                     batch declaration (`topLevelMethod`, `nestedMethods.*`)
//! GET /6/method                  exposed as `methodWithOptions`, reads query and headers
//! ```

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use axum::http::HeaderValue;
use clap::Parser;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use dual_route::config::{load_config, ServiceConfig, Strategy};
use dual_route::observability::{logging, metrics};
use dual_route::{
    Api, ApiBuilder, BoxError, CallOptions, HostServer, Payload, PathParams, RouteOptions, SpecTree,
    VirtualRequest, VirtualResponse,
};

#[derive(Parser)]
#[command(name = "dual-route")]
#[command(about = "Demo service exposing every route over HTTP and in-process", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `api.strategy` (`hook_replay` or `loopback`).
    #[arg(short, long)]
    strategy: Option<Strategy>,
}

/// The api, filled in once the builder is finished.
type ApiSlot = Arc<OnceLock<Api>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(strategy) = cli.strategy {
        config.api.strategy = strategy;
    }

    logging::init_tracing(&config.observability)?;
    tracing::info!("dual-route v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        strategy = config.api.strategy.as_str(),
        request_timeout_secs = config.server.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let slot = ApiSlot::default();
    let mut server = HostServer::new(config.server.clone());
    let mut builder = ApiBuilder::install(&mut server, config.api.clone());
    register_demo(&mut server, &mut builder, &slot)?;

    let api = builder.finish(&mut server)?;
    tracing::info!(endpoints = ?api.client().leaf_paths(), "Api ready");
    // `finish` runs once, so the slot is always empty here.
    let _ = slot.set(api);

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    server.run(listener, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

fn register_demo(
    server: &mut HostServer,
    builder: &mut ApiBuilder,
    slot: &ApiSlot,
) -> Result<(), Box<dyn std::error::Error>> {
    // Plain routes exposed through `expose_as`.
    server.get(
        "/1/method",
        RouteOptions::new().expose_as("method"),
        |_, _, reply: VirtualResponse| async move {
            reply.send("Hello from /1/method").await?;
            Ok(())
        },
    )?;
    server.get(
        "/2/method/:id",
        RouteOptions::new().expose_as("methodWithParams"),
        |params: PathParams, _, reply: VirtualResponse| async move {
            let id = params.get("id").cloned().unwrap_or_default();
            reply.send(format!("Hello from /2/method/ with id {id}")).await?;
            Ok(())
        },
    )?;
    server.get(
        "/3/nested/method/:id",
        RouteOptions::new().expose_as("nested.method"),
        |params: PathParams, _, reply: VirtualResponse| async move {
            let id = params.get("id").cloned().unwrap_or_default();
            reply.send(format!("Hello from /3/nested/method/ with id {id}")).await?;
            Ok(())
        },
    )?;

    // Named by the handler itself.
    builder.get(server, "/4/method", RouteOptions::new(), method_from_named_function)?;

    // Batch declaration: namespace keys name the anonymous handlers.
    builder.define(server, |v| {
        SpecTree::namespace([
            ("topLevelMethod", v.get("/5/top-level-method/:id", send_id()).into()),
            (
                "nestedMethods",
                SpecTree::namespace([
                    ("method", v.get("/5/nested-methods/method/:id", send_id()).into()),
                    ("otherMethod", v.get("/5/nested-methods/other-method/:id", send_id()).into()),
                    (
                        "deeplyNestedMethods",
                        SpecTree::namespace([
                            (
                                "method",
                                v.get("/5/nested-methods/deeply-nested-methods/method/:id", send_id())
                                    .into(),
                            ),
                            (
                                "otherMethod",
                                v.get("/5/nested-methods/deeply-nested-methods/other-method/:id", send_id())
                                    .into(),
                            ),
                        ]),
                    ),
                ]),
            ),
        ])
    })?;

    server.get(
        "/6/method",
        RouteOptions::new().expose_as("methodWithOptions"),
        |_, req: VirtualRequest, reply: VirtualResponse| async move {
            tracing::info!(query = ?req.query, headers = ?req.headers, "methodWithOptions called");
            reply.send("Hello from /6/method/ with query and headers").await?;
            Ok(())
        },
    )?;

    // Wire routes calling the invokers in-process.
    let id = json!({ "id": 123 });
    let invocations = [
        ("/invoke/1/method", "method", json!({})),
        ("/invoke/2/method", "methodWithParams", id.clone()),
        ("/invoke/3/nested/method", "nested.method", id.clone()),
        ("/invoke/4/method", "method_from_named_function", id.clone()),
        ("/invoke/5/top-level-method", "topLevelMethod", id.clone()),
        ("/invoke/5/nested-methods/method", "nestedMethods.method", id.clone()),
        ("/invoke/5/nested-methods/other-method", "nestedMethods.otherMethod", id.clone()),
        (
            "/invoke/5/nested-methods/deeply-nested-methods/method",
            "nestedMethods.deeplyNestedMethods.method",
            id.clone(),
        ),
        (
            "/invoke/5/nested-methods/deeply-nested-methods/other-method",
            "nestedMethods.deeplyNestedMethods.otherMethod",
            id.clone(),
        ),
    ];
    for (route, name, params) in invocations {
        server.get(route, RouteOptions::new(), invoke(slot, name, params, CallOptions::new()))?;
    }
    let options = CallOptions::new()
        .query("arg", 1)
        .header("x-foobar", HeaderValue::from_static("1"));
    server.get(
        "/invoke/6/method",
        RouteOptions::new(),
        invoke(slot, "methodWithOptions", id, options),
    )?;

    let meta = slot.clone();
    server.get("/", RouteOptions::new(), move |_, _, reply: VirtualResponse| {
        let meta = meta.clone();
        async move {
            let api = meta.get().ok_or("api is not sealed yet")?;
            reply.send(Payload::json(api.meta())?).await?;
            Ok(())
        }
    })?;

    Ok(())
}

async fn method_from_named_function(
    params: PathParams,
    _: VirtualRequest,
    reply: VirtualResponse,
) -> Result<(), BoxError> {
    let id = params.get("id").cloned().unwrap_or_default();
    reply.send(format!("Hello from /4/method with id {id}")).await?;
    Ok(())
}

/// Anonymous handler replying `{ "id": ... }`.
fn send_id() -> impl Fn(PathParams, VirtualRequest, VirtualResponse) -> BoxFuture<'static, Result<(), BoxError>>
       + Send
       + Sync
       + 'static {
    |params, _, reply| {
        async move {
            reply.send(json!({ "id": params.get("id") })).await?;
            Ok::<(), BoxError>(())
        }
        .boxed()
    }
}

/// Handler calling the invoker `name` and relaying its structured result.
fn invoke(
    slot: &ApiSlot,
    name: &'static str,
    params: Value,
    options: CallOptions,
) -> impl Fn(PathParams, VirtualRequest, VirtualResponse) -> BoxFuture<'static, Result<(), BoxError>>
       + Send
       + Sync
       + 'static {
    let slot = slot.clone();
    move |_, _, reply| {
        let slot = slot.clone();
        let params = params.clone();
        let options = options.clone();
        async move {
            let api = slot.get().ok_or("api is not sealed yet")?;
            let invoker = api
                .invoker(name)
                .ok_or_else(|| format!("no endpoint named '{name}'"))?;
            let result = invoker.call_with(params, options).await?;
            reply.send(Payload::json(&result)?).await?;
            Ok::<(), BoxError>(())
        }
        .boxed()
    }
}
