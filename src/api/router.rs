use super::*;

pub(super) fn build_router(state: AppState, security: ApiSecurity) -> Router {
    Router::new()
        .route("/rituals", post(submit_ritual))
        .route("/errors", get(get_errors).delete(reset_errors))
        .route("/page", get(get_page))
        .route("/audio", get(get_audio))
        .route("/registries", get(get_registries))
        .route("/capabilities", get(get_capabilities))
        .route("/pointer", post(set_pointer))
        .route("/processing", post(set_processing))
        .route("/options/select", post(select_option))
        .route("/events", get(get_events))
        .route("/events/subscribe", get(subscribe_events))
        .route("/events/{name}", post(dispatch_event))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, api_guard))
}
