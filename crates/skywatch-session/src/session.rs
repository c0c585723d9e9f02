//! Session manager: token acquisition, storage-tier selection, credential
//! injection and invalidation.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Navigator, Route, SessionError, StorageTiers};

/// Key holding the token, in whichever tier owns it.
pub const AUTH_KEY: &str = "auth";

/// Durable key holding the username of a remembered login.
pub const REMEMBERED_USER_KEY: &str = "rememberedUser";

/// Durable key flagging that the last login asked to be remembered.
pub const REMEMBER_ME_KEY: &str = "rememberMe";

/// Message used when the server gives no reason for a rejected login.
pub const GENERIC_AUTH_FAILURE: &str = "Authentication failed";

/// An authenticated session as seen from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    /// True when the token lives in the durable tier.
    pub persistent: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct ServerMessage {
    message: Option<String>,
}

/// Owns the authentication token lifecycle.
///
/// The token is kept in exactly one storage tier after a login. Any response
/// observed with `401 Unauthorized` clears both tiers and sends the shell to
/// the login view, no matter which request triggered it.
pub struct SessionManager {
    http: Client,
    base_url: String,
    tiers: StorageTiers,
    navigator: Arc<dyn Navigator>,
}

impl SessionManager {
    /// Create a session manager for the backend at `base_url`.
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        tiers: StorageTiers,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tiers,
            navigator,
        }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The shared HTTP client.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Authenticate and store the returned token.
    ///
    /// With `persistent` the token goes to the durable tier, otherwise to the
    /// tab tier; the other tier is cleared either way. Failures are returned
    /// to the caller and never retried.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        persistent: bool,
    ) -> Result<(), SessionError> {
        let url = format!("{}/api/authenticate", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&AuthenticateRequest {
                username,
                password,
                remember_me: persistent,
            })
            .send()
            .await
            .inspect_err(|e| warn!(error = %e, "login request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ServerMessage>()
                .await
                .ok()
                .and_then(|m| m.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| GENERIC_AUTH_FAILURE.to_string());
            warn!(%status, %message, "login rejected");
            return Err(SessionError::AuthenticationFailed(message));
        }

        let token = response
            .json::<AuthenticateResponse>()
            .await
            .ok()
            .and_then(|body| body.id_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::AuthenticationFailed("No token received".to_string()))?;

        self.store_token(&token, persistent).await?;
        self.remember_user(username, persistent).await?;

        info!(persistent, "logged in");
        self.navigator.navigate(Route::Dashboard);
        Ok(())
    }

    /// Clear the token from both tiers and return to the login view.
    pub async fn logout(&self) {
        self.clear_tokens().await;
        info!("logged out");
        self.navigator.navigate(Route::Login);
    }

    /// True iff either tier holds a token.
    pub async fn is_authenticated(&self) -> bool {
        self.session().await.is_some()
    }

    /// The current session. The durable tier takes precedence.
    pub async fn session(&self) -> Option<Session> {
        if let Some(token) = non_empty(self.tiers.durable.get(AUTH_KEY).await) {
            return Some(Session {
                token,
                persistent: true,
            });
        }

        non_empty(self.tiers.tab.get(AUTH_KEY).await).map(|token| Session {
            token,
            persistent: false,
        })
    }

    /// Username saved by the last remembered login, for pre-filling the form.
    pub async fn remembered_user(&self) -> Option<String> {
        let remember = self.tiers.durable.get(REMEMBER_ME_KEY).await;
        if remember.as_deref() != Some("true") {
            return None;
        }
        non_empty(self.tiers.durable.get(REMEMBERED_USER_KEY).await)
    }

    /// Add an `Authorization` header if a token is held.
    ///
    /// Requests without a token are passed through unchanged; the server is
    /// left to reject them.
    pub async fn attach_credential(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session().await {
            Some(session) => request.bearer_auth(session.token),
            None => request,
        }
    }

    /// Observe a response for authorization failure.
    ///
    /// On `401` both tiers are cleared and the shell is sent to the login
    /// view. Returns whether the response was an authorization failure.
    /// Safe to call for several failing responses in a row.
    pub async fn on_unauthorized(&self, response: &Response) -> bool {
        if response.status() != StatusCode::UNAUTHORIZED {
            return false;
        }

        warn!(url = %response.url(), "request unauthorized, invalidating session");
        self.clear_tokens().await;
        self.navigator.navigate(Route::Login);
        true
    }

    /// Send a request with credentials attached, watching the response.
    ///
    /// An unauthorized response is reported as [`SessionError::SessionExpired`]
    /// after the session has been invalidated.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SessionError> {
        let response = self.attach_credential(request).await.send().await?;

        if self.on_unauthorized(&response).await {
            return Err(SessionError::SessionExpired);
        }

        Ok(response)
    }

    async fn store_token(&self, token: &str, persistent: bool) -> Result<(), SessionError> {
        let (keep, clear) = if persistent {
            (&self.tiers.durable, &self.tiers.tab)
        } else {
            (&self.tiers.tab, &self.tiers.durable)
        };

        keep.set(AUTH_KEY, token).await?;
        clear.remove(AUTH_KEY).await?;
        Ok(())
    }

    async fn remember_user(&self, username: &str, persistent: bool) -> Result<(), SessionError> {
        let durable = &self.tiers.durable;
        if persistent {
            durable.set(REMEMBERED_USER_KEY, username).await?;
            durable.set(REMEMBER_ME_KEY, "true").await?;
        } else {
            durable.remove(REMEMBERED_USER_KEY).await?;
            durable.remove(REMEMBER_ME_KEY).await?;
        }
        Ok(())
    }

    /// Remove the token from both tiers. Each tier is attempted even if the
    /// other fails.
    async fn clear_tokens(&self) {
        for (tier, store) in [("durable", &self.tiers.durable), ("tab", &self.tiers.tab)] {
            if let Err(e) = store.remove(AUTH_KEY).await {
                warn!(tier, error = %e, "failed to clear token");
            }
        }
        debug!("cleared session tokens");
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
