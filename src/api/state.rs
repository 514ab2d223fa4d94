use super::*;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) sender: Sender<ApiCommand>,
}

impl AppState {
    /// Send `make(reply)` to the sandbox and wait for the answer.
    pub(super) async fn request<T>(
        &self,
        make: impl FnOnce(tokio::sync::oneshot::Sender<T>) -> ApiCommand,
    ) -> Result<T, String> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(make(tx))
            .map_err(|_| "Sandbox not running".to_string())?;
        rx.await.map_err(|_| "Channel closed".to_string())
    }
}
