use super::*;

pub(super) fn reply<T: serde::Serialize>(result: Result<T, String>) -> Json<ApiResponse<T>> {
    match result {
        Ok(data) => Json(ApiResponse::success(data)),
        Err(error) => Json(ApiResponse {
            ok: false,
            data: None,
            error: Some(error),
        }),
    }
}

pub(super) async fn submit_ritual(
    State(state): State<AppState>,
    Json(submission): Json<RitualSubmission>,
) -> Json<ApiResponse<RitualResult>> {
    reply(
        state
            .request(|tx| ApiCommand::Execute(submission, tx))
            .await,
    )
}

pub(super) async fn get_errors(State(state): State<AppState>) -> Json<ApiResponse<ErrorState>> {
    reply(state.request(ApiCommand::GetErrors).await)
}

pub(super) async fn reset_errors(State(state): State<AppState>) -> Json<ApiResponse<ErrorState>> {
    reply(state.request(ApiCommand::ResetErrors).await)
}

pub(super) async fn get_page(State(state): State<AppState>) -> Json<ApiResponse<PageSnapshot>> {
    reply(state.request(ApiCommand::GetPage).await)
}

pub(super) async fn get_audio(State(state): State<AppState>) -> Json<ApiResponse<Vec<SynthEvent>>> {
    reply(state.request(ApiCommand::GetAudio).await)
}

pub(super) async fn get_registries(
    State(state): State<AppState>,
) -> Json<ApiResponse<RegistryStats>> {
    reply(state.request(ApiCommand::GetRegistries).await)
}

pub(super) async fn get_capabilities(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<CatalogLine>>> {
    reply(state.request(ApiCommand::GetCapabilities).await)
}
