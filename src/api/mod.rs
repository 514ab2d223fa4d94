mod commands;
mod router;
mod routes_core;
mod routes_misc;
mod security;
mod state;
pub mod types;

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use crate::audio::SynthEvent;
use crate::capabilities::CatalogLine;
use crate::events::EventRecord;
use crate::executor::ErrorState;
use crate::page::PageSnapshot;
use crate::plugin::RitualSandbox;
use crate::registry::RegistryStats;
use crate::sandbox::Sandbox;
pub use commands::ApiCommand;
use commands::*;
use router::build_router;
use routes_core::*;
use routes_misc::*;
use security::*;
use state::*;
use types::*;

pub const DEFAULT_API_ADDR: &str = "127.0.0.1:3100";

/// Commands beyond this wait for the next frame.
const MAX_COMMANDS_PER_FRAME: usize = 64;

/// Serves the orchestrator HTTP boundary. Needs `RitualPlugin` for the sandbox.
pub struct ApiPlugin {
    pub addr: String,
}

impl Default for ApiPlugin {
    fn default() -> Self {
        Self {
            addr: std::env::var("RITUAL_API_ADDR")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        }
    }
}

impl Plugin for ApiPlugin {
    fn build(&self, app: &mut App) {
        let (tx, rx) = crossbeam_channel::unbounded::<ApiCommand>();

        app.insert_resource(ApiChannels { receiver: rx })
            .add_systems(Update, process_api_commands);

        let state = AppState { sender: tx };
        let security = ApiSecurity::from_env();
        let addr = self.addr.clone();
        std::thread::spawn(move || {
            if let Err(e) = serve(state, security, &addr) {
                eprintln!("[Ritual API] {e}");
            }
        });
    }
}

fn serve(state: AppState, security: ApiSecurity, addr: &str) -> Result<(), String> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| format!("runtime: {e}"))?;
    rt.block_on(async {
        let app = build_router(state, security);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| format!("Failed to bind to {addr}: {e}"))?;

        println!("[Ritual API] Listening on http://{addr}");

        axum::serve(listener, app)
            .await
            .map_err(|e| format!("server stopped: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::util::ServiceExt;

    /// Router wired to a sandbox owned by a worker thread, like the bevy system would.
    fn router() -> Router {
        let (tx, rx) = crossbeam_channel::unbounded::<ApiCommand>();
        std::thread::spawn(move || {
            let mut sandbox = Sandbox::new(SandboxConfig::default());
            while let Ok(command) = rx.recv() {
                handle_command(&mut sandbox, command);
            }
        });
        build_router(AppState { sender: tx }, ApiSecurity::new(None, 1000))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> serde_json::Value {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let res = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), 1 << 20)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn ritual_outcomes_and_error_counter() {
        let app = router();
        let ok = call(&app, "POST", "/rituals", Some(r#"{"code":"V.title(\"hi\");"}"#)).await;
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["data"]["outcome"]["status"], "success");

        let failed = call(&app, "POST", "/rituals", Some(r#"{"code":"throw \"x\";","label":"bad"}"#)).await;
        assert_eq!(failed["data"]["outcome"]["status"], "failed");
        assert_eq!(failed["data"]["errors"]["consecutive_errors"], 1);

        let errors = call(&app, "GET", "/errors", None).await;
        assert_eq!(errors["data"]["consecutive_errors"], 1);

        let reset = call(&app, "DELETE", "/errors", None).await;
        assert_eq!(reset["data"]["consecutive_errors"], 0);

        let page = call(&app, "GET", "/page", None).await;
        assert_eq!(page["data"]["title"], "hi");
    }

    #[tokio::test]
    async fn blocked_rituals_are_reported() {
        let app = router();
        let res = call(
            &app,
            "POST",
            "/rituals",
            Some(r#"{"code":"document.write(\"gone\");"}"#),
        )
        .await;
        assert_eq!(res["data"]["outcome"]["status"], "blocked");
        assert_eq!(res["data"]["errors"]["consecutive_errors"], 0);
    }

    #[tokio::test]
    async fn host_events_reach_listeners() {
        let app = router();
        call(
            &app,
            "POST",
            "/rituals",
            Some(r#"{"code":"V.on(\"knock\", |e| V.title(e[\"who\"]));"}"#),
        )
        .await;
        let res = call(&app, "POST", "/events/knock", Some(r#"{"who":"nobody"}"#)).await;
        assert_eq!(res["data"]["listeners"], 1);
        let page = call(&app, "GET", "/page", None).await;
        assert_eq!(page["data"]["title"], "nobody");

        let none = call(&app, "POST", "/events/silence", None).await;
        assert_eq!(none["data"]["listeners"], 0);
    }

    #[tokio::test]
    async fn event_log_and_catalog() {
        let app = router();
        call(&app, "POST", "/rituals", Some(r#"{"code":"let a = 1;","label":"first"}"#)).await;
        let events = call(&app, "GET", "/events", None).await;
        let list = events["data"].as_array().expect("event list");
        assert!(list
            .iter()
            .any(|e| e["event"] == "ritual_finished" && e["label"] == "first"));
        let last = list.last().and_then(|e| e["seq"].as_u64()).expect("seq");

        let newer = call(&app, "GET", &format!("/events?since={last}"), None).await;
        assert_eq!(newer["data"].as_array().map(Vec::len), Some(0));

        let catalog = call(&app, "GET", "/capabilities", None).await;
        assert!(!catalog["data"].as_array().expect("catalog").is_empty());

        let registries = call(&app, "GET", "/registries", None).await;
        assert_eq!(registries["ok"], true);
    }

    #[tokio::test]
    async fn processing_flag_and_option_selection() {
        let app = router();
        let res = call(&app, "POST", "/processing", Some(r#"{"active":true}"#)).await;
        assert_eq!(res["ok"], true);
        let res = call(&app, "POST", "/options/select", Some(r#"{"label":"nothing"}"#)).await;
        assert_eq!(res["data"]["selected"], false);
        let res = call(&app, "POST", "/pointer", Some(r#"{"x":10,"y":20}"#)).await;
        assert_eq!(res["data"]["listeners"], 0);
    }
}
