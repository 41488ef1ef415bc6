//! bunq OAuth surface
//!
//! Two small routes: `POST /bunq/connect` hands the browser the provider
//! authorisation URL (as a `Location` header on a 204, CORS-exposed so a
//! frontend can read it), and `GET /bunq/authorize` is the redirect
//! target that exchanges the code for a token server-side and stores the
//! resulting credential.

use crate::stores::{Credential, CredentialsStore};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use guilder_types::{AuthId, UserId};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    /// Browser-facing authorisation endpoint
    pub auth_url: String,
    /// Server-side token exchange endpoint
    pub token_url: String,
    /// API base stored into the credential context
    pub api_base_url: String,
    /// Internal user the connected credential belongs to
    pub user_id: UserId,
}

impl OAuthConfig {
    pub fn production(client_id: String, client_secret: String, redirect_url: String, user_id: UserId) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            auth_url: "https://oauth.bunq.com/auth".to_string(),
            token_url: "https://api.oauth.bunq.com/v1/token".to_string(),
            api_base_url: "https://api.bunq.com".to_string(),
            user_id,
        }
    }
}

pub struct BunqOAuth {
    config: OAuthConfig,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialsStore>,
    /// Outstanding connect attempts by their `state` nonce
    pending: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl BunqOAuth {
    pub fn new(config: OAuthConfig, credentials: Arc<dyn CredentialsStore>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            credentials,
            pending: RwLock::new(HashMap::new()),
        }
    }
}

/// Routes for mounting under the application router
pub fn router(oauth: Arc<BunqOAuth>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .expose_headers([header::LOCATION]);

    Router::new()
        .route("/bunq/connect", post(connect))
        .route("/bunq/authorize", get(authorize))
        .layer(cors)
        .with_state(oauth)
}

async fn connect(State(oauth): State<Arc<BunqOAuth>>) -> Response {
    let state = Uuid::new_v4().to_string();
    oauth.pending.write().insert(state.clone(), Utc::now());

    let url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
        oauth.config.auth_url, oauth.config.client_id, oauth.config.redirect_url, state,
    );

    (StatusCode::NO_CONTENT, [(header::LOCATION, url)]).into_response()
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

async fn authorize(
    State(oauth): State<Arc<BunqOAuth>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let state = match query.state.filter(|state| !state.is_empty()) {
        Some(state) => state,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };

    // exactly one of code/error must be present
    let code = match (query.code, query.error) {
        (Some(code), None) => code,
        (None, Some(error)) => {
            warn!(%error, "provider reported an authorisation error");
            return (StatusCode::BAD_REQUEST, error).into_response();
        }
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };

    if oauth.pending.write().remove(&state).is_none() {
        return (StatusCode::BAD_REQUEST, "unknown state").into_response();
    }

    let token_url = format!(
        "{}?grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&client_secret={}",
        oauth.config.token_url,
        code,
        oauth.config.redirect_url,
        oauth.config.client_id,
        oauth.config.client_secret,
    );

    let response = match oauth.http.post(&token_url).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!(status = %response.status(), "token exchange rejected");
            return StatusCode::BAD_GATEWAY.into_response();
        }
        Err(err) => {
            warn!(error = %err, "token exchange failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let token: TokenResponse = match response.json().await {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "malformed token response");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let api_context = serde_json::json!({
        "base_url": oauth.config.api_base_url,
        "api_key": token.access_token,
        // resolved during the first session handshake
        "bunq_user_id": "",
    });

    let credential = Credential {
        id: AuthId::new(),
        user_id: oauth.config.user_id,
        api_context: api_context.to_string(),
        bunq_user_id: String::new(),
    };

    if let Err(err) = oauth.credentials.save(credential).await {
        warn!(error = %err, "could not store credential");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(user_id = %oauth.config.user_id, "bunq connection established");
    (StatusCode::OK, "connected").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryCredentialsStore;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Json;
    use tower::ServiceExt;

    fn config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "https://example.org/api/bunq/authorize".to_string(),
            auth_url: "https://oauth.bunq.com/auth".to_string(),
            token_url,
            api_base_url: "https://api.bunq.com".to_string(),
            user_id: UserId::new(),
        }
    }

    fn oauth_with(token_url: String) -> (Arc<BunqOAuth>, Arc<InMemoryCredentialsStore>) {
        let credentials = Arc::new(InMemoryCredentialsStore::new());
        let oauth = Arc::new(BunqOAuth::new(config(token_url), credentials.clone()));
        (oauth, credentials)
    }

    async fn token_server() -> String {
        let app = Router::new().route(
            "/v1/token",
            post(|| async { Json(serde_json::json!({"access_token": "at-123", "token_type": "bearer"})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}/v1/token")
    }

    #[tokio::test]
    async fn test_connect_exposes_location_with_state() {
        let (oauth, _) = oauth_with("http://unused".to_string());
        let app = router(oauth.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/bunq/connect")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://oauth.bunq.com/auth?response_type=code"));
        assert!(location.contains("state="));

        // the state in the URL is recorded as pending
        let state = location.split("state=").nth(1).unwrap();
        assert!(oauth.pending.read().contains_key(state));
    }

    #[tokio::test]
    async fn test_authorize_requires_state() {
        let (oauth, _) = oauth_with("http://unused".to_string());
        let app = router(oauth);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/bunq/authorize?code=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_authorize_rejects_code_and_error_together() {
        let (oauth, _) = oauth_with("http://unused".to_string());
        let app = router(oauth);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/bunq/authorize?state=s&code=abc&error=denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_authorize_rejects_neither_code_nor_error() {
        let (oauth, _) = oauth_with("http://unused".to_string());
        let app = router(oauth);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/bunq/authorize?state=s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_authorize_exchanges_code_and_stores_credential() {
        let token_url = token_server().await;
        let (oauth, credentials) = oauth_with(token_url);
        let user_id = oauth.config.user_id;
        let app = router(oauth.clone());

        // connect first so a pending state exists
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/bunq/connect")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        let state = location.split("state=").nth(1).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/bunq/authorize?state={state}&code=abc"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = credentials.credentials_for(user_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].api_context.contains("at-123"));
    }

    #[tokio::test]
    async fn test_authorize_with_unknown_state_is_rejected() {
        let (oauth, credentials) = oauth_with("http://unused".to_string());
        let user_id = oauth.config.user_id;
        let app = router(oauth);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/bunq/authorize?state=never-issued&code=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(credentials.credentials_for(user_id).await.unwrap().is_empty());
    }
}
