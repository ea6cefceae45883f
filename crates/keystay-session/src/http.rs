//! [`AuthClient`] over HTTP with `reqwest`.
//!
//! | call            | request                                         |
//! |-----------------|-------------------------------------------------|
//! | `fetch_profile` | `GET {base}{profile_path}`, bearer access token |
//! | `refresh`       | `POST {base}{refresh_path}` `{"refreshToken"}`  |
//! | `logout`        | `POST {base}{logout_path}`, bearer access token |

use std::time::Duration;

use keystay_protocol::{Profile, RefreshRequest, RefreshResponse, Role};
use reqwest::{Client, Response};

use crate::{AuthClient, AuthEndpoints, AuthError};

/// Talks to the booking platform's identity endpoint.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: Client,
    endpoints: AuthEndpoints,
}

impl HttpAuthClient {
    /// Builds a client with the endpoints' request timeout.
    ///
    /// # Errors
    /// Returns [`AuthError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new(endpoints: AuthEndpoints) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, endpoints))
    }

    /// Uses an already configured `reqwest` client.
    pub fn with_client(client: Client, endpoints: AuthEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.base_url.trim_end_matches('/'), path)
    }
}

impl AuthClient for HttpAuthClient {
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, AuthError> {
        let response = self
            .client
            .get(self.url(&self.endpoints.profile_path))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;
        let body: serde_json::Value = check(response, "profile")?
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;
        decode_profile(body)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AuthError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let response = self
            .client
            .post(self.url(&self.endpoints.refresh_path))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        check(response, "refresh")?
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))
    }

    async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.url(&self.endpoints.logout_path))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;
        check(response, "logout")?;
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> AuthError {
    AuthError::Transport(e.to_string())
}

fn check(response: Response, endpoint: &'static str) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    tracing::debug!(endpoint, status = status.as_u16(), "identity endpoint rejected request");
    Err(AuthError::Status {
        endpoint,
        status: status.as_u16(),
    })
}

/// Decodes a profile body, telling an unknown role apart from other shape
/// errors.
fn decode_profile(body: serde_json::Value) -> Result<Profile, AuthError> {
    if let Some(role) = body.get("role").and_then(serde_json::Value::as_str) {
        if role.parse::<Role>().is_err() {
            return Err(AuthError::InvalidRole(role.to_string()));
        }
    }
    serde_json::from_value(body).map_err(|e| AuthError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_profile_unknown_role_is_invalid_role() {
        let body = json!({"id": "u-1", "email": "a@b.c", "role": "admin"});

        assert_eq!(
            decode_profile(body),
            Err(AuthError::InvalidRole("admin".into()))
        );
    }

    #[test]
    fn test_decode_profile_missing_id_is_decode_error() {
        let body = json!({"email": "a@b.c", "role": "guest"});

        assert!(matches!(decode_profile(body), Err(AuthError::Decode(_))));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpAuthClient::with_client(
            Client::new(),
            AuthEndpoints {
                base_url: "https://api.stay.example/".into(),
                ..AuthEndpoints::default()
            },
        );

        assert_eq!(client.url("/auth/refresh"), "https://api.stay.example/auth/refresh");
    }
}
