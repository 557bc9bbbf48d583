//! Authorization-code client for the Microsoft identity platform (v2 endpoints)
//! and the Graph `/me` profile.

use crate::config::ProviderCredentials;
use crate::error::{ProviderError, ProviderStage};
use crate::identity::http::{HttpsClient, build_client};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{Method, Request, StatusCode, header};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// Largest provider response body the gateway buffers.
pub const MAX_RESPONSE_BYTES: usize = 256 * 1024;

/// The subset of the remote profile the gateway binds accounts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteProfile {
    /// Stable provider subject (Graph object id).
    pub id: String,
    /// `mail`, or `userPrincipalName` when the mailbox attribute is empty.
    pub email: String,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphProfile {
    #[serde(default)]
    id: String,
    mail: Option<String>,
    user_principal_name: Option<String>,
    given_name: Option<String>,
    display_name: Option<String>,
    surname: Option<String>,
    photo: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<GraphProfile> for RemoteProfile {
    type Error = String;

    fn try_from(profile: GraphProfile) -> Result<Self, Self::Error> {
        if profile.id.trim().is_empty() {
            return Err("profile has no id".into());
        }
        let email = non_empty(profile.mail)
            .or_else(|| non_empty(profile.user_principal_name))
            .ok_or_else(|| "profile has neither mail nor userPrincipalName".to_string())?;

        Ok(RemoteProfile {
            id: profile.id,
            email,
            given_name: non_empty(profile.given_name).or_else(|| non_empty(profile.display_name)),
            surname: non_empty(profile.surname),
            photo_url: non_empty(profile.photo),
        })
    }
}

/// Classify a non-2xx provider answer.
///
/// Understands both the OAuth2 error body (`{"error": "...", "error_description": "..."}`)
/// and the Graph error body (`{"error": {"code": "...", "message": "..."}}`). A 5xx
/// without either body is an outage, not a refusal.
fn rejection(stage: ProviderStage, status: StatusCode, body: &[u8]) -> ProviderError {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let (code, description) = match parsed.as_ref().and_then(|v| v.get("error")) {
        Some(serde_json::Value::String(code)) => (
            code.clone(),
            parsed
                .as_ref()
                .and_then(|v| v.get("error_description"))
                .and_then(|d| d.as_str())
                .map(String::from),
        ),
        Some(serde_json::Value::Object(inner)) => (
            inner
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("provider_error")
                .to_string(),
            inner
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from),
        ),
        _ if status.is_server_error() => {
            return ProviderError::Unavailable {
                stage,
                reason: format!("provider answered {status}"),
            };
        }
        _ => (format!("http_{}", status.as_u16()), None),
    };

    ProviderError::Rejected {
        stage,
        status: Some(status),
        code,
        description,
    }
}

pub struct IdentityProviderClient {
    creds: ProviderCredentials,
    http: HttpsClient,
}

impl std::fmt::Debug for IdentityProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderClient")
            .field("tenant_id", &self.creds.tenant_id)
            .field("client_id", &self.creds.client_id)
            .field("redirect_uri", &self.creds.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl IdentityProviderClient {
    pub fn new(creds: ProviderCredentials) -> Result<Self, rustls::Error> {
        Ok(Self {
            creds,
            http: build_client()?,
        })
    }

    fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{leaf}",
            self.creds.authority_url, self.creds.tenant_id
        )
    }

    /// The provider authorize URL the browser is sent to. Pure string construction.
    pub fn begin_login(&self) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.creds.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.creds.redirect_uri)
            .append_pair("scope", &self.creds.scope)
            .append_pair("response_mode", "query")
            .finish();
        format!("{}?{query}", self.endpoint("authorize"))
    }

    /// Error reported by the provider on the callback itself (`?error=...`).
    pub fn callback_error(code: &str, description: Option<&str>) -> ProviderError {
        ProviderError::Rejected {
            stage: ProviderStage::Callback,
            status: None,
            code: code.to_string(),
            description: description.map(String::from),
        }
    }

    /// Exchange the authorization code and fetch the profile it grants access to.
    #[tracing::instrument(skip_all)]
    pub async fn complete_login(&self, code: &str) -> Result<RemoteProfile, ProviderError> {
        let access_token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&access_token).await?;
        tracing::info!(subject = %profile.id, "Fetched remote profile");
        Ok(profile)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let stage = ProviderStage::TokenExchange;
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.creds.client_id)
            .append_pair("client_secret", &self.creds.client_secret)
            .append_pair("code", code)
            .append_pair("redirect_uri", &self.creds.redirect_uri)
            .append_pair("grant_type", "authorization_code")
            .append_pair("scope", &self.creds.scope)
            .finish();

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint("token"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::from(form)))
            .map_err(|e| ProviderError::MalformedResponse {
                stage,
                reason: format!("could not build request: {e}"),
            })?;

        let (status, body) = self.send(stage, request).await?;
        if !status.is_success() {
            let err = rejection(stage, status, &body);
            tracing::warn!(stage = %stage, upstream_status = status.as_u16(), error = %err, "Code exchange rejected");
            return Err(err);
        }

        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| ProviderError::MalformedResponse {
                stage,
                reason: e.to_string(),
            })?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, ProviderError> {
        let stage = ProviderStage::ProfileFetch;
        let request = Request::builder()
            .method(Method::GET)
            .uri(&self.creds.profile_url)
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::new()))
            .map_err(|e| ProviderError::MalformedResponse {
                stage,
                reason: format!("could not build request: {e}"),
            })?;

        let (status, body) = self.send(stage, request).await?;
        if !status.is_success() {
            let err = rejection(stage, status, &body);
            tracing::warn!(stage = %stage, upstream_status = status.as_u16(), error = %err, "Profile fetch rejected");
            return Err(err);
        }

        let profile: GraphProfile =
            serde_json::from_slice(&body).map_err(|e| ProviderError::MalformedResponse {
                stage,
                reason: e.to_string(),
            })?;
        RemoteProfile::try_from(profile)
            .map_err(|reason| ProviderError::MalformedResponse { stage, reason })
    }

    /// Send a request and read the whole body, bounded by the configured timeout.
    async fn send(
        &self,
        stage: ProviderStage,
        request: Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Bytes), ProviderError> {
        let limit = self.creds.timeout;
        let exchange = async {
            let response = self.http.request(request).await.map_err(|e| {
                ProviderError::Unavailable {
                    stage,
                    reason: e.to_string(),
                }
            })?;
            let status = response.status();
            let body = Limited::new(response.into_body(), MAX_RESPONSE_BYTES)
                .collect()
                .await
                .map_err(|e| {
                    if e.downcast_ref::<LengthLimitError>().is_some() {
                        ProviderError::MalformedResponse {
                            stage,
                            reason: format!("response body exceeds {MAX_RESPONSE_BYTES} bytes"),
                        }
                    } else {
                        ProviderError::Unavailable {
                            stage,
                            reason: e.to_string(),
                        }
                    }
                })?
                .to_bytes();
            Ok::<_, ProviderError>((status, body))
        };

        match tokio::time::timeout(limit, exchange).await {
            Ok(result) => {
                if let Err(err) = &result {
                    tracing::warn!(stage = %stage, error = %err, "Identity provider call failed");
                }
                result
            }
            Err(_) => {
                tracing::warn!(stage = %stage, timeout = ?limit, "Identity provider call timed out");
                Err(ProviderError::Unavailable {
                    stage,
                    reason: format!("timed out after {limit:?}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn creds() -> ProviderCredentials {
        ProviderCredentials {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "s3cr3t".into(),
            redirect_uri: "http://localhost:8080/auth/callback".into(),
            authority_url: "https://login.microsoftonline.com".into(),
            profile_url: "https://graph.microsoft.com/v1.0/me".into(),
            scope: "openid profile email User.Read".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn begin_login_is_deterministic() {
        let client = IdentityProviderClient::new(creds()).unwrap();
        let url = client.begin_login();
        assert_eq!(url, client.begin_login());
        assert_eq!(
            url,
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/authorize?\
             client_id=client-1&response_type=code\
             &redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth%2Fcallback\
             &scope=openid+profile+email+User.Read&response_mode=query"
        );
        assert!(!url.contains("s3cr3t"));
    }

    #[test]
    fn profile_falls_back_to_principal_name() {
        let profile = GraphProfile {
            id: "abc123".into(),
            mail: None,
            user_principal_name: Some("ana@tenant.onmicrosoft.com".into()),
            given_name: Some("Ana".into()),
            display_name: Some("Ana Lopez".into()),
            surname: Some("Lopez".into()),
            photo: None,
        };
        let remote = RemoteProfile::try_from(profile).unwrap();
        assert_eq!(remote.email, "ana@tenant.onmicrosoft.com");
        assert_eq!(remote.given_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn profile_without_email_is_rejected() {
        let profile = GraphProfile {
            id: "abc123".into(),
            mail: Some("".into()),
            user_principal_name: None,
            given_name: None,
            display_name: None,
            surname: None,
            photo: None,
        };
        assert!(RemoteProfile::try_from(profile).is_err());
    }

    #[test]
    fn rejection_reads_oauth_and_graph_bodies() {
        let oauth = rejection(
            ProviderStage::TokenExchange,
            StatusCode::BAD_REQUEST,
            br#"{"error":"invalid_grant","error_description":"code redeemed"}"#,
        );
        assert!(matches!(
            oauth,
            ProviderError::Rejected { ref code, ref description, .. }
                if code == "invalid_grant" && description.as_deref() == Some("code redeemed")
        ));

        let graph = rejection(
            ProviderStage::ProfileFetch,
            StatusCode::UNAUTHORIZED,
            br#"{"error":{"code":"InvalidAuthenticationToken","message":"expired"}}"#,
        );
        assert!(matches!(
            graph,
            ProviderError::Rejected { ref code, .. } if code == "InvalidAuthenticationToken"
        ));

        let opaque = rejection(ProviderStage::ProfileFetch, StatusCode::FORBIDDEN, b"<html>");
        assert!(matches!(
            opaque,
            ProviderError::Rejected { ref code, .. } if code == "http_403"
        ));
    }

    #[test]
    fn server_error_without_oauth_body_is_unavailable() {
        let outage = rejection(
            ProviderStage::TokenExchange,
            StatusCode::SERVICE_UNAVAILABLE,
            b"Service Unavailable",
        );
        assert!(outage.is_retryable());
        assert_eq!(outage.stage(), ProviderStage::TokenExchange);

        // An explicit OAuth error wins over the status class
        let refused = rejection(
            ProviderStage::TokenExchange,
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"error":"server_error","error_description":"AADSTS90033"}"#,
        );
        assert!(matches!(
            refused,
            ProviderError::Rejected { ref code, .. } if code == "server_error"
        ));
    }
}
