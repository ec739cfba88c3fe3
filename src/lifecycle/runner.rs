//! Hook execution around a handler.

use crate::http::{Payload, VirtualRequest, VirtualResponse};
use crate::lifecycle::{BoxError, Handler, HookStage, Hooks};
use crate::routing::template::PathParams;

/// Run `on_request` and `pre_handler` hooks, then the handler unless a hook
/// hijacked the response.
///
/// `reply` is consumed so the caller holds no handle to the pending response
/// once this returns; an unsent response then resolves as dropped.
pub async fn drive(
    hooks: &Hooks,
    handler: &Handler,
    params: PathParams,
    request: VirtualRequest,
    reply: VirtualResponse,
) -> Result<(), BoxError> {
    for stage in [HookStage::OnRequest, HookStage::PreHandler] {
        for hook in hooks.stage(stage) {
            if reply.hijacked() {
                break;
            }
            hook(request.clone(), reply.clone()).await?;
        }
    }

    if reply.hijacked() {
        tracing::debug!(url = %request.url, "Response hijacked by hook, handler skipped");
        return Ok(());
    }

    reply.enter_handler();
    handler.call(params, request, reply).await
}

/// Thread the payload through every `on_send` hook in order. Only called
/// for responses sent once the handler was entered.
pub async fn apply_on_send(
    hooks: &Hooks,
    request: &VirtualRequest,
    reply: &VirtualResponse,
    mut payload: Payload,
) -> Result<Payload, BoxError> {
    for hook in hooks.send_stage() {
        payload = hook(request.clone(), reply.clone(), payload).await?;
    }
    Ok(payload)
}

/// Run `on_response` hooks. The response is already final, so failures are
/// logged and do not change the outcome.
pub async fn apply_on_response(hooks: &Hooks, request: &VirtualRequest, reply: &VirtualResponse) {
    for hook in hooks.stage(HookStage::OnResponse) {
        if let Err(e) = hook(request.clone(), reply.clone()).await {
            tracing::warn!(url = %request.url, error = %e, "on_response hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::http::{Method, StatusCode};
    use tokio::sync::oneshot;

    use crate::api::ApiResponse;

    fn request() -> VirtualRequest {
        VirtualRequest::new(Method::GET, "/echo/1")
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |entry| sink.lock().unwrap().push(entry))
    }

    async fn run(hooks: Hooks, handler: Handler) -> Option<ApiResponse> {
        let hooks = Arc::new(hooks);
        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request(), hooks.clone(), tx);
        drive(&hooks, &handler, PathParams::new(), request(), reply)
            .await
            .unwrap();
        rx.await.ok()
    }

    #[tokio::test]
    async fn test_stage_order() {
        let (log, record) = recorder();
        let (r1, r2, r3, r4, r5) = (
            record.clone(),
            record.clone(),
            record.clone(),
            record.clone(),
            record.clone(),
        );
        let hooks = Hooks::new()
            .on_request(move |_, _| {
                r1("on_request");
                async { Ok(()) }
            })
            .pre_handler(move |_, _| {
                r2("pre_handler");
                async { Ok(()) }
            })
            .on_send(move |_, _, payload| {
                r3("on_send");
                async move { Ok(payload) }
            })
            .on_response(move |_, _| {
                r4("on_response");
                async { Ok(()) }
            });
        let handler = Handler::new(move |_, _, reply: VirtualResponse| {
            r5("handler");
            async move {
                reply.send("ok").await?;
                Ok(())
            }
        });

        let response = run(hooks, handler).await.unwrap();
        assert_eq!(response.text(), Some("ok"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["on_request", "pre_handler", "handler", "on_send", "on_response"]
        );
    }

    #[tokio::test]
    async fn test_hijack_skips_handler_and_later_hooks() {
        let (log, record) = recorder();
        let (r1, r2, r3, r4, r5) = (
            record.clone(),
            record.clone(),
            record.clone(),
            record.clone(),
            record.clone(),
        );
        let hooks = Hooks::new()
            .on_request(|_, reply: VirtualResponse| async move {
                reply.code(StatusCode::UNAUTHORIZED);
                reply.send("denied").await?;
                Ok(())
            })
            .on_request(move |_, _| {
                r1("second on_request");
                async { Ok(()) }
            })
            .pre_handler(move |_, _| {
                r2("pre_handler");
                async { Ok(()) }
            })
            .on_send(move |_, _, payload| {
                r4("on_send");
                async move { Ok(payload) }
            })
            .on_response(move |_, _| {
                r5("on_response");
                async { Ok(()) }
            });
        let handler = Handler::new(move |_, _, _| {
            r3("handler");
            async { Ok(()) }
        });

        let response = run(hooks, handler).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.text(), Some("denied"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_on_send_is_a_pipeline() {
        let hooks = Hooks::new()
            .on_send(|_, _, payload: Payload| async move {
                Ok(Payload::Text(format!("h1({})", payload.as_text().unwrap_or_default())))
            })
            .on_send(|_, _, payload: Payload| async move {
                Ok(Payload::Text(format!("h2({})", payload.as_text().unwrap_or_default())))
            });
        let handler = Handler::new(|_, _, reply: VirtualResponse| async move {
            reply.send("body").await?;
            Ok(())
        });

        let response = run(hooks, handler).await.unwrap();
        assert_eq!(response.text(), Some("h2(h1(body))"));
    }

    #[tokio::test]
    async fn test_on_response_failure_does_not_fail_invocation() {
        let hooks = Hooks::new().on_response(|_, _| async { Err("audit sink down".into()) });
        let handler = Handler::new(|_, _, reply: VirtualResponse| async move {
            reply.send("done").await?;
            Ok(())
        });

        let response = run(hooks, handler).await.unwrap();
        assert_eq!(response.text(), Some("done"));
    }

    #[tokio::test]
    async fn test_handler_without_send_drops_pending_response() {
        let handler = Handler::new(|_, _, _| async { Ok(()) });
        assert!(run(Hooks::new(), handler).await.is_none());
    }
}
