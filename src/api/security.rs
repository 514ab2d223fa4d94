use super::*;
use axum::http::HeaderMap;
use std::time::{Duration, Instant};

pub(super) const DEFAULT_API_RATE_LIMIT_PER_SEC: u32 = 60;

const RATE_WINDOW: Duration = Duration::from_secs(1);
/// Buckets idle this long are dropped once the table grows past `MAX_BUCKETS`.
const BUCKET_IDLE: Duration = Duration::from_secs(10);
const MAX_BUCKETS: usize = 4096;

/// Optional shared token plus a per-client request budget for the orchestrator boundary.
#[derive(Clone)]
pub(super) struct ApiSecurity {
    required_token: Option<String>,
    rate_limit_per_sec: u32,
    buckets: Arc<Mutex<HashMap<String, RateBucket>>>,
}

struct RateBucket {
    window_start: Instant,
    count: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum Denial {
    MissingToken,
    WrongToken,
    RateLimited,
}

impl Denial {
    fn status(&self) -> StatusCode {
        match self {
            Denial::MissingToken | Denial::WrongToken => StatusCode::UNAUTHORIZED,
            Denial::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Denial::MissingToken => {
                "Unauthorized: send Authorization: Bearer <RITUAL_API_TOKEN> or x-api-key"
            }
            Denial::WrongToken => "Unauthorized: token does not match RITUAL_API_TOKEN",
            Denial::RateLimited => "Rate limit exceeded",
        }
    }
}

impl ApiSecurity {
    pub(super) fn new(required_token: Option<String>, rate_limit_per_sec: u32) -> Self {
        Self {
            required_token: required_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            rate_limit_per_sec: rate_limit_per_sec.max(1),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(super) fn from_env() -> Self {
        let rate = std::env::var("RITUAL_API_RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_API_RATE_LIMIT_PER_SEC);
        Self::new(std::env::var("RITUAL_API_TOKEN").ok(), rate)
    }

    /// Token first, then the caller's budget; a rejected token does not spend budget.
    pub(super) fn admit(&self, headers: &HeaderMap) -> Result<(), Denial> {
        if let Some(expected) = self.required_token.as_deref() {
            match presented_token(headers) {
                None => return Err(Denial::MissingToken),
                Some(token) if token != expected => return Err(Denial::WrongToken),
                Some(_) => {}
            }
        }
        if self.spend(client_key(headers), Instant::now()) {
            Ok(())
        } else {
            Err(Denial::RateLimited)
        }
    }

    /// Count one request for `client`; false once its window is used up.
    fn spend(&self, client: String, now: Instant) -> bool {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buckets.len() > MAX_BUCKETS {
            buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < BUCKET_IDLE);
        }
        let bucket = buckets.entry(client).or_insert(RateBucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(bucket.window_start) >= RATE_WINDOW {
            bucket.window_start = now;
            bucket.count = 0;
        }
        bucket.count = bucket.count.saturating_add(1);
        bucket.count <= self.rate_limit_per_sec
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `Authorization: Bearer <token>` wins over `x-api-key`.
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = header(headers, "authorization").map(|auth| {
        auth.strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .unwrap_or(auth)
            .trim()
    });
    bearer.or_else(|| header(headers, "x-api-key"))
}

/// The originating client behind any proxies, or `local`.
fn client_key(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .or_else(|| header(headers, "x-real-ip"))
        .unwrap_or("local")
        .to_string()
}

pub(super) async fn api_guard(
    State(security): State<ApiSecurity>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    if let Err(denial) = security.admit(req.headers()) {
        warn!(
            "[Ritual API] {} {} refused: {:?}",
            req.method(),
            req.uri().path(),
            denial
        );
        return (denial.status(), Json(ApiResponse::err(denial.message()))).into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::Request as HttpRequest, routing::get, Router};
    use tower::util::ServiceExt;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().expect("header value"));
        }
        map
    }

    #[test]
    fn tokens_are_checked_before_budget() {
        let security = ApiSecurity::new(Some(" secret ".to_string()), 1);
        assert_eq!(security.admit(&headers(&[])), Err(Denial::MissingToken));
        assert_eq!(
            security.admit(&headers(&[("authorization", "Bearer nope")])),
            Err(Denial::WrongToken)
        );
        assert_eq!(security.admit(&headers(&[("x-api-key", "secret")])), Ok(()));
        assert_eq!(
            security.admit(&headers(&[("authorization", "bearer secret")])),
            Err(Denial::RateLimited)
        );
    }

    #[test]
    fn blank_token_disables_auth() {
        let security = ApiSecurity::new(Some("   ".to_string()), 5);
        assert_eq!(security.admit(&headers(&[])), Ok(()));
    }

    #[test]
    fn budget_is_per_originating_client_and_refills() {
        let security = ApiSecurity::new(None, 1);
        let start = Instant::now();
        assert!(security.spend("10.0.0.1".to_string(), start));
        assert!(!security.spend("10.0.0.1".to_string(), start));
        assert!(security.spend("10.0.0.2".to_string(), start));
        assert!(security.spend("10.0.0.1".to_string(), start + RATE_WINDOW));

        let proxied = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(client_key(&proxied), "203.0.113.9");
        assert_eq!(client_key(&headers(&[("x-real-ip", "10.0.0.3")])), "10.0.0.3");
        assert_eq!(client_key(&headers(&[])), "local");
    }

    #[tokio::test]
    async fn guard_answers_with_status_and_json_error() {
        let app = Router::new().route("/", get(|| async { "ok" })).layer(
            middleware::from_fn_with_state(ApiSecurity::new(Some("secret".to_string()), 1), api_guard),
        );
        let request = |token: &str| {
            HttpRequest::builder()
                .uri("/")
                .header("x-api-key", token)
                .body(axum::body::Body::empty())
                .expect("request")
        };

        let refused = app.clone().oneshot(request("nope")).await.expect("response");
        assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(refused.into_body(), 1 << 16)
            .await
            .expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["ok"], false);

        let ok = app.clone().oneshot(request("secret")).await.expect("response");
        assert_eq!(ok.status(), StatusCode::OK);
        let limited = app.oneshot(request("secret")).await.expect("response");
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
