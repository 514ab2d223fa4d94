use serde::{Deserialize, Serialize};

use crate::executor::{ErrorState, Outcome};

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn ok() -> ApiResponse<String> {
        ApiResponse {
            ok: true,
            data: Some("ok".to_string()),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> ApiResponse<String> {
        ApiResponse {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct RitualSubmission {
    pub code: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct RitualResult {
    pub outcome: Outcome,
    pub errors: ErrorState,
}

#[derive(Deserialize, Clone, Copy)]
pub struct PointerRequest {
    pub x: f64,
    pub y: f64,
}

#[derive(Deserialize, Clone, Copy)]
pub struct ProcessingRequest {
    pub active: bool,
}

#[derive(Deserialize, Clone)]
pub struct OptionSelectRequest {
    pub label: String,
}

#[derive(Serialize, Clone, Copy)]
pub struct DispatchResult {
    pub listeners: usize,
}

#[derive(Serialize, Clone, Copy)]
pub struct SelectResult {
    pub selected: bool,
}

#[derive(Deserialize, Default)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: Option<u64>,
}
