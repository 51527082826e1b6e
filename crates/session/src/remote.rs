//! Gateway to the remote authority.
//!
//! Each operation is a single request/response round trip. There is no
//! retry or backoff here: failures go straight back to the caller.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scholaris_auth::{PermissionSet, SessionToken, User};

/// Body of a successful `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: SessionToken,
    pub user: User,
}

/// Body of a successful `GET /auth/verificar`.
///
/// This is the only source of the permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(rename = "usuario")]
    pub user: User,

    #[serde(rename = "permisos", default)]
    pub permissions: PermissionSet,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials were rejected. The message is passed through as-is.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The token was rejected (expired, revoked, malformed).
    #[error("session rejected: {0}")]
    SessionInvalid(String),

    /// The call did not complete within the configured bound.
    #[error("remote authority did not answer within {0:?}")]
    Timeout(std::time::Duration),

    /// Network or infrastructure failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The authority answered with something outside the contract.
    #[error("unexpected response ({status}): {detail}")]
    Protocol { status: u16, detail: String },
}

/// Remote authority contract consumed by the [`Authority`](crate::Authority).
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse, RemoteError>;

    /// Verify `token` and fetch the current user and permission set.
    ///
    /// Implementations attach the token as a bearer credential.
    async fn verify_session(&self, token: &SessionToken) -> Result<VerifyResponse, RemoteError>;
}

/// HTTP implementation of [`RemoteAuthority`].
#[derive(Debug, Clone)]
pub struct HttpAuthorityClient {
    api_url: String,
    client: reqwest::Client,
}

impl HttpAuthorityClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(api_url, reqwest::Client::new())
    }

    pub fn with_client(api_url: impl Into<String>, client: reqwest::Client) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { api_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

#[async_trait]
impl RemoteAuthority for HttpAuthorityClient {
    async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse, RemoteError> {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                identifier,
                password,
            })
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp.json().await.map_err(|e| RemoteError::Protocol {
                status: status.as_u16(),
                detail: format!("failed to parse login response: {e}"),
            });
        }

        let message = error_message(status, resp).await;
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RemoteError::Authentication(message))
            }
            _ => Err(unexpected(status, message)),
        }
    }

    async fn verify_session(&self, token: &SessionToken) -> Result<VerifyResponse, RemoteError> {
        let resp = self
            .client
            .get(self.url("/auth/verificar"))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp.json().await.map_err(|e| RemoteError::Protocol {
                status: status.as_u16(),
                detail: format!("failed to parse verification response: {e}"),
            });
        }

        let message = error_message(status, resp).await;
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RemoteError::SessionInvalid(message))
            }
            _ => Err(unexpected(status, message)),
        }
    }
}

/// Server errors are infrastructure failures; anything else off-contract.
fn unexpected(status: StatusCode, message: String) -> RemoteError {
    if status.is_server_error() {
        RemoteError::Transport(format!("{status}: {message}"))
    } else {
        RemoteError::Protocol {
            status: status.as_u16(),
            detail: message,
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// The authority answers `{ "message": ... }` (sometimes `mensaje` or
/// `error`); fall back to the raw text, then the status reason.
async fn error_message(status: StatusCode, resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    message_from_body(&text)
        .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string())
}

fn message_from_body(text: &str) -> Option<String> {
    let body: serde_json::Value = serde_json::from_str(text).ok()?;
    ["message", "mensaje", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_response_decodes_contract_shape() {
        let json = serde_json::json!({
            "usuario": {
                "id": 1,
                "nombre": "Ana",
                "apellido": "Quispe",
                "email": "ana@colegio.edu.pe",
                "rol": "Administrador",
                "rol_id": 1,
                "activo": true
            },
            "permisos": [
                { "menu_id": 5, "menu_nombre": "Notas", "menu_ruta": "/notas", "puede_ver": true }
            ]
        });

        let resp: VerifyResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.user.first_name, "Ana");
        assert_eq!(resp.permissions.len(), 1);
    }

    #[test]
    fn verify_response_without_permissions_is_empty_set() {
        let json = serde_json::json!({
            "usuario": {
                "id": 2, "nombre": "Luis", "email": "l@x.pe", "rol": "Docente", "rol_id": 3
            }
        });

        let resp: VerifyResponse = serde_json::from_value(json).unwrap();
        assert!(resp.permissions.is_empty());
    }

    #[test]
    fn error_message_prefers_known_keys() {
        assert_eq!(
            message_from_body(r#"{"message":"Credenciales inválidas"}"#).as_deref(),
            Some("Credenciales inválidas")
        );
        assert_eq!(
            message_from_body(r#"{"mensaje":"Token expirado"}"#).as_deref(),
            Some("Token expirado")
        );
        assert_eq!(message_from_body("plain text"), None);
        assert_eq!(message_from_body(r#"{"code":401}"#), None);
    }

    #[test]
    fn login_response_with_blank_token_is_rejected() {
        let json = serde_json::json!({
            "token": "",
            "user": {
                "id": 1,
                "nombre": "Ana",
                "email": "ana@colegio.edu.pe",
                "rol": "Administrador",
                "rol_id": 1
            }
        });

        assert!(serde_json::from_value::<LoginResponse>(json).is_err());
    }

    #[test]
    fn server_errors_are_transport_failures() {
        assert!(matches!(
            unexpected(StatusCode::BAD_GATEWAY, "down".into()),
            RemoteError::Transport(_)
        ));
        assert!(matches!(
            unexpected(StatusCode::NOT_FOUND, "missing".into()),
            RemoteError::Protocol { status: 404, .. }
        ));
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let client = HttpAuthorityClient::new("http://localhost:8080/api/");
        assert_eq!(client.url("/auth/login"), "http://localhost:8080/api/auth/login");
    }
}
