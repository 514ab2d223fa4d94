use super::*;

pub(super) async fn set_pointer(
    State(state): State<AppState>,
    Json(pointer): Json<PointerRequest>,
) -> Json<ApiResponse<DispatchResult>> {
    let result = state
        .request(|tx| ApiCommand::SetPointer(pointer, tx))
        .await
        .map(|listeners| DispatchResult { listeners });
    reply(result)
}

pub(super) async fn set_processing(
    State(state): State<AppState>,
    Json(req): Json<ProcessingRequest>,
) -> Json<ApiResponse<String>> {
    match state
        .request(|tx| ApiCommand::SetProcessing(req.active, tx))
        .await
    {
        Ok(()) => Json(ApiResponse::ok()),
        Err(e) => Json(ApiResponse::err(e)),
    }
}

pub(super) async fn select_option(
    State(state): State<AppState>,
    Json(req): Json<OptionSelectRequest>,
) -> Json<ApiResponse<SelectResult>> {
    let result = state
        .request(|tx| ApiCommand::SelectOption(req.label, tx))
        .await
        .map(|selected| SelectResult { selected });
    reply(result)
}

/// Any JSON body (or none) is handed to listeners as the event payload.
pub(super) async fn dispatch_event(
    State(state): State<AppState>,
    axum::extract::Path(name): axum::extract::Path<String>,
    body: axum::body::Bytes,
) -> Json<ApiResponse<DispatchResult>> {
    let payload = if body.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                return Json(ApiResponse {
                    ok: false,
                    data: None,
                    error: Some(format!("Invalid event payload: {e}")),
                })
            }
        }
    };
    let result = state
        .request(|tx| ApiCommand::DispatchEvent(name, payload, tx))
        .await
        .map(|listeners| DispatchResult { listeners });
    reply(result)
}

pub(super) async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<ApiResponse<Vec<EventRecord>>> {
    reply(
        state
            .request(|tx| ApiCommand::GetEvents(query.since, tx))
            .await,
    )
}

pub(super) async fn subscribe_events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = async_stream::stream! {
        let mut tick = tokio::time::interval(std::time::Duration::from_millis(100));
        let mut last_seq = 0u64;
        loop {
            tick.tick().await;
            let Ok(events) = state.request(|tx| ApiCommand::GetEvents(Some(last_seq), tx)).await else {
                break;
            };
            for ev in &events {
                let payload = serde_json::to_string(ev).unwrap_or_else(|_| "{}".to_string());
                yield Ok::<SseEvent, Infallible>(SseEvent::default().event("sandbox_event").data(payload));
            }
            if let Some(last) = events.last() {
                last_seq = last.seq;
            }
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(5))
            .text("keep-alive"),
    )
}
