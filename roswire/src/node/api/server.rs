//! HTTP plumbing for the slave API: a single `POST /` route dispatching
//! XML-RPC method calls to registered handlers.

use std::{collections::HashMap, sync::Arc};

use axum::{
    http::{HeaderMap, HeaderValue},
    routing::post,
    Router,
};
use dxr::{Fault, FaultResponse, MethodCall, MethodResponse, TryToValue};
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Notify};
use tracing::{error, span, Instrument, Level};

use crate::{
    node::api::handler::{Handler, HandlerError, HandlerMap},
    xmlrpc::protocol::{ApiError, ApiResponse},
};

const DEFAULT_FAULT_CODE: i32 = -1;

#[derive(Default)]
pub struct RouteBuilder {
    handlers: HandlerMap,
}

impl RouteBuilder {
    pub fn new() -> Self {
        RouteBuilder {
            handlers: HashMap::new(),
        }
    }

    pub fn add_method(mut self, method: &'static str, handler: Box<dyn Handler>) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    pub fn build(self) -> Router {
        let span = span!(Level::DEBUG, "slave_api");
        let handlers = Arc::new(self.handlers);

        Router::new().route(
            "/",
            post(move |body: String| async move {
                handle_rpc(&body, handlers).instrument(span).await
            }),
        )
    }
}

/// The slave API server. Shutdown is triggered through the paired
/// [Notify]; `serve_listener` drains in-flight handlers before returning.
pub struct Server {
    router: Router,
    shutdown_trigger: Arc<Notify>,
}

impl Server {
    pub fn new(router: Router) -> (Self, Arc<Notify>) {
        let shutdown_trigger = Arc::new(Notify::new());

        (
            Server {
                router,
                shutdown_trigger: shutdown_trigger.clone(),
            },
            shutdown_trigger,
        )
    }

    pub async fn serve_listener(self, listener: TcpListener) -> Result<(), std::io::Error> {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move { self.shutdown_trigger.notified().await })
            .await
    }
}

pub async fn handle_rpc(body: &str, handlers: Arc<HandlerMap>) -> (StatusCode, HeaderMap, String) {
    let method: MethodCall = match dxr::deserialize_xml(body) {
        Ok(call) => call,
        Err(e) => {
            error!("Failed to deserialize XML-RPC body: {e}");
            return fault_response(DEFAULT_FAULT_CODE, format!("XML error: {e}"));
        }
    };

    let method_name = method.name();

    let Some(handler) = handlers.get(method_name) else {
        error!("Peer requested unknown method: \"{method_name}\"");
        return fault_response(DEFAULT_FAULT_CODE, format!("Unknown method: {method_name}"));
    };

    let api_response: ApiResponse = match handler.handle(&method.params()).await {
        Ok(success) => success.into(),
        Err(HandlerError::Api(e)) => e.into(),
        Err(e) => ApiError::failure(format!("Internal server error: {e}")).into(),
    };

    make_response(&MethodResponse::new(
        api_response
            .try_to_value()
            .expect("ApiResponse serialization is infallible"),
    ))
}

fn make_response<T: Serialize>(response: &T) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));

    match dxr::serialize_xml(&response) {
        Ok(xml) => (StatusCode::OK, headers, xml),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, headers, e.to_string()),
    }
}

fn fault_response(code: i32, msg: impl Into<String>) -> (StatusCode, HeaderMap, String) {
    make_response(&FaultResponse::from(Fault::new(code, msg.into())))
}
