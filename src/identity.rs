use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity account not found: {0}")]
    NotFound(String),
    #[error("identity provider error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to reach identity provider: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected identity provider response: {0}")]
    Decode(String),
}

impl IdentityError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IdentityError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityUser {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub email_verified: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<IdentityUser, IdentityError>;

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<IdentityUser, IdentityError>;

    /// Issue an email-verification link that lands on `continue_url` once followed.
    async fn issue_verification_link(
        &self,
        email: &str,
        continue_url: &str,
    ) -> Result<String, IdentityError>;

    async fn set_custom_claims(&self, uid: &str, claims: &Value) -> Result<(), IdentityError>;

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError>;

    /// Delete the account behind `email`. A missing account counts as already deleted.
    async fn delete_user_by_email(&self, email: &str) -> Result<(), IdentityError> {
        match self.get_user_by_email(email).await {
            Ok(user) => self.delete_user(&user.uid).await,
            Err(IdentityError::NotFound(_)) => {
                info!(email, "identity account already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn ping(&self) -> Result<(), IdentityError>;
}

/// REST client for an Identity Toolkit style account API.
#[derive(Clone)]
pub struct IdentityClient {
    http: Client,
    base_url: Url,
    project_id: String,
    access_token: String,
}

impl fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl IdentityClient {
    pub fn new(
        base_url: Url,
        project_id: String,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let http = Client::builder()
            .user_agent("welcome-dispatch/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            project_id,
            access_token,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = Url::parse(&cfg.identity.base_url)?;
        Ok(Self::new(
            base_url,
            cfg.identity.project_id.clone(),
            cfg.identity.access_token.clone(),
            Duration::from_secs(cfg.identity.timeout_secs),
        )?)
    }

    fn endpoint(&self, action: &str) -> Result<Url, IdentityError> {
        self.base_url
            .join(&format!("v1/projects/{}/{}", self.project_id, action))
            .map_err(|e| IdentityError::Decode(format!("invalid identity base URL: {e}")))
    }

    pub fn build_request(&self, action: &str, body: &Value) -> Result<reqwest::Request, IdentityError> {
        let endpoint = self.endpoint(action)?;
        Ok(self
            .http
            .post(endpoint)
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/json")
            .json(body)
            .build()?)
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value, IdentityError> {
        let request = self.build_request(action, &body)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        let text = res.text().await?;
        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| IdentityError::Decode(e.to_string()));
        }
        let err = classify_error(status, &text);
        if !err.is_not_found() {
            warn!(action, %status, "identity provider call failed");
        }
        Err(err)
    }
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OobResponse {
    oob_link: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Map a non-success response to an `IdentityError`, pulling out the
/// provider's not-found codes.
pub fn classify_error(status: StatusCode, body: &str) -> IdentityError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    if status == StatusCode::NOT_FOUND
        || message.starts_with("USER_NOT_FOUND")
        || message.starts_with("EMAIL_NOT_FOUND")
    {
        return IdentityError::NotFound(message);
    }
    IdentityError::Api {
        status: status.as_u16(),
        message,
    }
}

fn into_identity_user(info: AccountInfo, fallback_email: &str) -> IdentityUser {
    IdentityUser {
        uid: info.local_id,
        email: info.email.unwrap_or_else(|| fallback_email.to_string()),
        display_name: info.display_name,
        email_verified: info.email_verified,
    }
}

#[async_trait]
impl IdentityProvider for IdentityClient {
    async fn get_user_by_email(&self, email: &str) -> Result<IdentityUser, IdentityError> {
        let value = self.call("accounts:lookup", json!({ "email": [email] })).await?;
        let resp: LookupResponse = serde_json::from_value(value)
            .map_err(|e| IdentityError::Decode(e.to_string()))?;
        resp.users
            .into_iter()
            .next()
            .map(|info| into_identity_user(info, email))
            .ok_or_else(|| IdentityError::NotFound(email.to_string()))
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<IdentityUser, IdentityError> {
        let value = self
            .call(
                "accounts",
                json!({
                    "email": email,
                    "password": password,
                    "displayName": display_name,
                    "emailVerified": false,
                }),
            )
            .await?;
        let info: AccountInfo =
            serde_json::from_value(value).map_err(|e| IdentityError::Decode(e.to_string()))?;
        info!(uid = %info.local_id, "created identity account");
        Ok(into_identity_user(info, email))
    }

    async fn issue_verification_link(
        &self,
        email: &str,
        continue_url: &str,
    ) -> Result<String, IdentityError> {
        let value = self
            .call(
                "accounts:sendOobCode",
                json!({
                    "requestType": "VERIFY_EMAIL",
                    "email": email,
                    "returnOobLink": true,
                    "continueUrl": continue_url,
                    "canHandleCodeInApp": false,
                }),
            )
            .await?;
        let resp: OobResponse =
            serde_json::from_value(value).map_err(|e| IdentityError::Decode(e.to_string()))?;
        resp.oob_link
            .filter(|link| !link.is_empty())
            .ok_or_else(|| IdentityError::Decode("response carried no oobLink".into()))
    }

    async fn set_custom_claims(&self, uid: &str, claims: &Value) -> Result<(), IdentityError> {
        self.call(
            "accounts:update",
            json!({
                "localId": uid,
                "customAttributes": claims.to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        self.call("accounts:delete", json!({ "localId": uid })).await?;
        info!(uid, "deleted identity account");
        Ok(())
    }

    async fn ping(&self) -> Result<(), IdentityError> {
        // A lookup for an address that cannot exist proves reachability and auth.
        match self.get_user_by_email("healthcheck@invalid.example").await {
            Ok(_) | Err(IdentityError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> IdentityClient {
        IdentityClient::new(
            Url::parse("https://identity.example/").unwrap(),
            "proj-1".into(),
            "token".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn build_request_targets_project_endpoint_with_bearer() {
        let request = client()
            .build_request("accounts:lookup", &json!({ "email": ["a@example.com"] }))
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/projects/proj-1/accounts:lookup");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let rendered = format!("{:?}", client());
        assert!(rendered.contains("proj-1"));
        assert!(!rendered.contains("token\""));
    }

    #[test]
    fn classify_error_detects_not_found_codes() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_NOT_FOUND"}}"#;
        assert!(classify_error(StatusCode::BAD_REQUEST, body).is_not_found());

        let body = r#"{"error":{"code":400,"message":"USER_NOT_FOUND : no user record"}}"#;
        assert!(classify_error(StatusCode::BAD_REQUEST, body).is_not_found());

        assert!(classify_error(StatusCode::NOT_FOUND, "").is_not_found());
    }

    #[test]
    fn classify_error_keeps_other_failures() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_EXISTS"}}"#;
        match classify_error(StatusCode::BAD_REQUEST, body) {
            IdentityError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "EMAIL_EXISTS");
            }
            other => panic!("unexpected {other:?}"),
        }

        match classify_error(StatusCode::BAD_GATEWAY, "upstream down") {
            IdentityError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_success_body_is_a_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            // Promise 64 bytes, send a few, then hang up.
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 64\r\n\r\n{\"users\"",
                )
                .await
                .unwrap();
        });

        let client = IdentityClient::new(
            Url::parse(&format!("http://{addr}/")).unwrap(),
            "proj-1".into(),
            "token".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.get_user_by_email("a@example.com").await.unwrap_err();
        assert!(matches!(err, IdentityError::Transport(_)), "got {err:?}");
    }
}
