//! Invocation tests: hook replay, loopback and the real wire agree.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::{HeaderValue, StatusCode};
use serde_json::{json, Value};

use dual_route::config::Strategy;
use dual_route::{
    Api, BoxError, CallOptions, Hooks, InvokeError, Payload, PathParams, RouteOptions, SpecTree,
    VirtualRequest, VirtualResponse,
};

mod common;

/// Replies `201` with the params, url, request headers and query it saw.
async fn echo_with_on_request_hook(
    params: PathParams,
    req: VirtualRequest,
    reply: VirtualResponse,
) -> Result<(), BoxError> {
    let headers: serde_json::Map<String, Value> = req
        .headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), Value::from(value.to_str().ok()?))))
        .collect();
    reply.code(StatusCode::CREATED);
    reply
        .send(json!({
            "id": params.get("id"),
            "url": req.url,
            "requestHeaders": headers,
            "requestQuery": req.query,
        }))
        .await?;
    Ok(())
}

fn on_request_hooks() -> Hooks {
    Hooks::new().on_request(|_, reply: VirtualResponse| async move {
        reply.header("x-on-request", "true")?;
        Ok(())
    })
}

/// Echo endpoints exposed under `strategy`, already served.
async fn echo_api(strategy: Strategy) -> (Api, common::Running) {
    let (mut server, mut builder) = common::setup(strategy);
    builder
        .define(&mut server, |v| {
            SpecTree::list([
                v.get("/echo/:id", common::echo),
                v.get("/echo-with-on-request-hook/:id", echo_with_on_request_hook)
                    .hooks(on_request_hooks()),
            ])
        })
        .unwrap();
    let api = builder.finish(&mut server).unwrap();
    let running = common::serve(server).await;
    (api, running)
}

#[tokio::test]
async fn test_echo_via_hook_replay() {
    let (api, _running) = echo_api(Strategy::HookReplay).await;
    let result = api.invoker("echo").unwrap().call(json!({ "id": 456 })).await.unwrap();

    assert_eq!(result.status(), StatusCode::CREATED);
    assert_eq!(result.json(), Some(&json!({ "id": "456", "url": "/echo/456" })));
    assert_eq!(result.header("content-type"), Some("application/json; charset=utf-8"));
}

#[tokio::test]
async fn test_echo_via_loopback() {
    let (api, _running) = echo_api(Strategy::Loopback).await;
    let result = api.invoker("echo").unwrap().call(json!({ "id": 456 })).await.unwrap();

    assert_eq!(result.status(), StatusCode::CREATED);
    assert_eq!(result.json(), Some(&json!({ "id": "456", "url": "/echo/456" })));
    // Loopback goes through the sealed router's layers.
    assert!(result.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_echo_over_the_wire() {
    let (_api, running) = echo_api(Strategy::HookReplay).await;
    let res = common::client()
        .get(running.url("/echo/456"))
        .send()
        .await
        .expect("server unreachable");

    assert_eq!(res.status(), 201);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "id": "456", "url": "/echo/456" }));
}

#[tokio::test]
async fn test_strategies_agree() {
    let (replay, _a) = echo_api(Strategy::HookReplay).await;
    let (loopback, _b) = echo_api(Strategy::Loopback).await;
    let options = CallOptions::new()
        .query("foobar", 1)
        .header("x-foobar", HeaderValue::from_static("2"));

    for (name, route) in [("echo", "/echo"), ("echo_with_on_request_hook", "/echo-with-on-request-hook")] {
        let a = replay
            .invoker(name)
            .unwrap()
            .call_with(json!({ "id": 456 }), options.clone())
            .await
            .unwrap();
        let b = loopback
            .invoker(name)
            .unwrap()
            .call_with(json!({ "id": 456 }), options.clone())
            .await
            .unwrap();

        assert_eq!(a.status(), b.status(), "{name}");
        let (a, b) = (a.json().unwrap(), b.json().unwrap());
        assert_eq!(a["id"], b["id"]);
        assert_eq!(a["url"], b["url"]);
        assert_eq!(a["url"], format!("{route}/456?foobar=1"));
    }
}

#[tokio::test]
async fn test_call_options_reach_the_handler() {
    for strategy in [Strategy::HookReplay, Strategy::Loopback] {
        let (api, _running) = echo_api(strategy).await;
        let options = CallOptions::new()
            .query("foobar", 1)
            .header("x-foobar", HeaderValue::from_static("2"));
        let result = api
            .invoker("echo_with_on_request_hook")
            .unwrap()
            .call_with(json!({ "id": 456 }), options)
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::CREATED);
        assert_eq!(result.header("x-on-request"), Some("true"), "{strategy:?}");
        let body = result.json().unwrap();
        assert_eq!(body["requestQuery"], json!({ "foobar": "1" }));
        assert_eq!(body["requestHeaders"]["x-foobar"], "2");
        assert!(body["requestHeaders"]["x-request-id"].is_string());
    }
}

#[tokio::test]
async fn test_on_request_hook_applies_on_the_wire() {
    let (_api, running) = echo_api(Strategy::HookReplay).await;
    let res = common::client()
        .get(running.url("/echo-with-on-request-hook/7?foobar=1"))
        .header("x-foobar", "2")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 201);
    assert_eq!(res.headers()["x-on-request"], "true");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["requestQuery"], json!({ "foobar": "1" }));
    assert_eq!(body["url"], "/echo-with-on-request-hook/7?foobar=1");
}

#[tokio::test]
async fn test_hijacking_hook_skips_handler() {
    let handler_runs = Arc::new(AtomicUsize::new(0));
    let pre_handler_runs = Arc::new(AtomicUsize::new(0));

    let hooks = {
        let pre = pre_handler_runs.clone();
        Hooks::new()
            .on_request(|_, reply: VirtualResponse| async move {
                reply.code(StatusCode::FORBIDDEN);
                reply.send(json!({ "error": "denied" })).await?;
                Ok(())
            })
            .pre_handler(move |_, _| {
                let pre = pre.clone();
                async move {
                    pre.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .on_send(|_, _, payload: Payload| async move {
                Ok(Payload::Text(format!("wrapped({payload:?})")))
            })
    };

    let (mut server, mut builder) = common::setup(Strategy::HookReplay);
    let runs = handler_runs.clone();
    builder
        .get(
            &mut server,
            "/guarded",
            RouteOptions::new().hooks(hooks).expose_as("guarded"),
            move |_, _, reply: VirtualResponse| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    reply.send("handler").await?;
                    Ok(())
                }
            },
        )
        .unwrap();
    let api = builder.finish(&mut server).unwrap();
    let running = common::serve(server).await;

    let result = api.invoker("guarded").unwrap().call(json!({})).await.unwrap();
    assert_eq!(result.status(), StatusCode::FORBIDDEN);
    assert_eq!(result.json(), Some(&json!({ "error": "denied" })));

    let res = common::client().get(running.url("/guarded")).send().await.unwrap();
    assert_eq!(res.status(), 403);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "denied" }));

    assert_eq!(handler_runs.load(Ordering::SeqCst), 0);
    assert_eq!(pre_handler_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_on_send_hooks_compose_in_order() {
    let hooks = Hooks::new()
        .on_send(|_, _, payload: Payload| async move {
            Ok(Payload::Text(format!("h1({})", payload.as_text().unwrap_or_default())))
        })
        .on_send(|_, _, payload: Payload| async move {
            Ok(Payload::Text(format!("h2({})", payload.as_text().unwrap_or_default())))
        });

    let (mut server, mut builder) = common::setup(Strategy::HookReplay);
    builder
        .get(
            &mut server,
            "/wrapped",
            RouteOptions::new().hooks(hooks).expose_as("wrapped"),
            |_, _, reply: VirtualResponse| async move {
                reply.send("body").await?;
                Ok(())
            },
        )
        .unwrap();
    let api = builder.finish(&mut server).unwrap();
    let running = common::serve(server).await;

    let result = api.invoker("wrapped").unwrap().call(json!({})).await.unwrap();
    assert_eq!(result.text(), Some("h2(h1(body))"));

    let wire = common::client().get(running.url("/wrapped")).send().await.unwrap();
    assert_eq!(wire.text().await.unwrap(), "h2(h1(body))");
}

#[tokio::test]
async fn test_on_send_status_and_headers_agree_across_strategies() {
    let mut seen = Vec::new();
    for strategy in [Strategy::HookReplay, Strategy::Loopback] {
        let hooks = Hooks::new().on_send(|_, reply: VirtualResponse, payload: Payload| async move {
            reply.code(StatusCode::ACCEPTED);
            reply.header("x-sent", "1")?;
            Ok(payload)
        });
        let (mut server, mut builder) = common::setup(strategy);
        builder
            .get(
                &mut server,
                "/accepted",
                RouteOptions::new().hooks(hooks).expose_as("accepted"),
                |_, _, reply: VirtualResponse| async move {
                    reply.send("queued").await?;
                    Ok(())
                },
            )
            .unwrap();
        let api = builder.finish(&mut server).unwrap();
        let _running = common::serve(server).await;

        let result = api.invoker("accepted").unwrap().call(json!({})).await.unwrap();
        seen.push((
            result.status(),
            result.header("x-sent").map(str::to_string),
            result.text().map(str::to_string),
        ));
    }

    let expected = (StatusCode::ACCEPTED, Some("1".to_string()), Some("queued".to_string()));
    assert_eq!(seen, vec![expected.clone(), expected]);
}

#[tokio::test]
async fn test_stage_order_within_one_invocation() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mark = |label: &'static str| {
        let seen = seen.clone();
        move |_: VirtualRequest, _: VirtualResponse| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(label);
                Ok::<(), BoxError>(())
            }
        }
    };
    let hooks = Hooks::new()
        .on_request(mark("on_request"))
        .pre_handler(mark("pre_handler"))
        .on_response(mark("on_response"))
        .on_send({
            let seen = seen.clone();
            move |_, _, payload| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push("on_send");
                    Ok(payload)
                }
            }
        });

    let (mut server, mut builder) = common::setup(Strategy::HookReplay);
    let handler_seen = seen.clone();
    builder
        .get(
            &mut server,
            "/staged",
            RouteOptions::new().hooks(hooks).expose_as("staged"),
            move |_, _, reply: VirtualResponse| {
                let seen = handler_seen.clone();
                async move {
                    seen.lock().unwrap().push("handler");
                    reply.send("done").await?;
                    Ok(())
                }
            },
        )
        .unwrap();
    let api = builder.finish(&mut server).unwrap();

    api.invoker("staged").unwrap().call(json!({})).await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["on_request", "pre_handler", "handler", "on_send", "on_response"]
    );
}

#[tokio::test]
async fn test_missing_parameter_fails_before_any_hook() {
    let hook_runs = Arc::new(AtomicUsize::new(0));
    let hooks = {
        let runs = hook_runs.clone();
        Hooks::new().on_request(move |_, _| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    for strategy in [Strategy::HookReplay, Strategy::Loopback] {
        let (mut server, mut builder) = common::setup(strategy);
        builder
            .get(
                &mut server,
                "/a/:id",
                RouteOptions::new().hooks(hooks.clone()).expose_as("a"),
                common::echo,
            )
            .unwrap();
        let api = builder.finish(&mut server).unwrap();
        let _running = common::serve(server).await;

        let invoker = api.invoker("a").unwrap();
        for params in [json!({}), json!({ "id": null }), json!({ "id": "" }), json!({ "id": false })] {
            let err = invoker.call(params).await.unwrap_err();
            assert!(matches!(err, InvokeError::ParameterMismatch(_)), "{strategy:?}: {err}");
        }
    }
    assert_eq!(hook_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_failures() {
    for strategy in [Strategy::HookReplay, Strategy::Loopback] {
        let (mut server, mut builder) = common::setup(strategy);
        builder
            .define(&mut server, |v| {
                SpecTree::namespace([
                    ("fails", v.post("/fails", |_, _, _| async { Err("boom".into()) }).into()),
                    ("silent", v.post("/silent", |_, _, _| async { Ok(()) }).into()),
                ])
            })
            .unwrap();
        let api = builder.finish(&mut server).unwrap();
        let _running = common::serve(server).await;

        let fails = api.invoker("fails").unwrap().call(json!({})).await;
        let silent = api.invoker("silent").unwrap().call(json!({})).await;
        match strategy {
            Strategy::HookReplay => {
                assert!(matches!(fails, Err(InvokeError::Handler(_))));
                assert!(matches!(silent, Err(InvokeError::NoResponse)));
            }
            // The wire path turns both into a server error response.
            Strategy::Loopback => {
                assert_eq!(fails.unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(silent.unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
}

#[tokio::test]
async fn test_loopback_before_seal_is_not_ready() {
    let (mut server, mut builder) = common::setup(Strategy::Loopback);
    builder
        .get(&mut server, "/echo/:id", RouteOptions::new(), common::echo)
        .unwrap();
    let api = builder.finish(&mut server).unwrap();

    let err = api.invoker("echo").unwrap().call(json!({ "id": 1 })).await.unwrap_err();
    assert!(matches!(err, InvokeError::HostNotReady(_)));

    let _running = common::serve(server).await;
    let result = api.invoker("echo").unwrap().call(json!({ "id": 1 })).await.unwrap();
    assert_eq!(result.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_request_body_reaches_handler() {
    for strategy in [Strategy::HookReplay, Strategy::Loopback] {
        let (mut server, mut builder) = common::setup(strategy);
        builder
            .post(
                &mut server,
                "/items",
                RouteOptions::new().expose_as("create"),
                |_, req: VirtualRequest, reply: VirtualResponse| async move {
                    let item: Value = req.json().ok_or("body is not JSON")?;
                    reply.code(StatusCode::CREATED);
                    reply.send(json!({ "created": item })).await?;
                    Ok(())
                },
            )
            .unwrap();
        let api = builder.finish(&mut server).unwrap();
        let _running = common::serve(server).await;

        let options = CallOptions::new().body(json!({ "name": "widget" }));
        let result = api.invoker("create").unwrap().call_with(json!({}), options).await.unwrap();
        assert_eq!(result.status(), StatusCode::CREATED);
        assert_eq!(result.json(), Some(&json!({ "created": { "name": "widget" } })));
    }
}

#[tokio::test]
async fn test_concurrent_invocations_are_independent() {
    let (api, _running) = echo_api(Strategy::HookReplay).await;
    let invoker = api.invoker("echo").unwrap().clone();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let invoker = invoker.clone();
            tokio::spawn(async move { invoker.call(json!({ "id": i })).await })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.json().unwrap()["id"], i.to_string());
    }
}
