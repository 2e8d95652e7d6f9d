use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use shared::{
    domain::{RemoteUserId, TeamId},
    error::{AuthError, RemoteError},
};

use crate::RemoteConnector;

/// Normalized result of either authentication strategy.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub email: String,
    pub remote_user_id: RemoteUserId,
    pub team_name: String,
    pub team_id: TeamId,
    pub token: String,
    pub cookie: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DomainResponse {
    ok: bool,
    #[serde(default)]
    team_id: String,
    #[serde(default)]
    sso: bool,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    ok: bool,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct SigninResponse {
    ok: bool,
    #[serde(default)]
    token: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    user_email: String,
    #[serde(default)]
    team: String,
}

/// Interactive email/team/password flow against the remote network's auth
/// endpoints: resolve team, resolve user, then sign in. Each step aborts the
/// chain with a specific cause.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    /// `base_url` is the auth endpoint prefix; the step name is appended
    /// directly (e.g. `https://net.example.com/api/auth.` + `findTeam`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        method: &str,
        form: &[(&str, &str)],
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .post(format!("{}{method}", self.base_url))
            .form(form)
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, %body, method, "unexpected auth response");
            return Err(AuthError::UnexpectedResponse);
        }

        response.json::<T>().await.map_err(|err| {
            debug!(error = %err, method, "failed to parse auth response");
            AuthError::UnexpectedResponse
        })
    }

    async fn find_team(&self, domain: &str) -> Result<String, AuthError> {
        let data: DomainResponse = self.post_form("findTeam", &[("domain", domain)]).await?;

        if !data.ok {
            return Err(AuthError::TeamNotFound(domain.to_string()));
        }
        if data.sso {
            return Err(AuthError::SsoUnsupported);
        }

        Ok(data.team_id)
    }

    async fn find_user(&self, email: &str, team_id: &str) -> Result<String, AuthError> {
        let data: UserResponse = self
            .post_form("findUser", &[("email", email), ("team", team_id)])
            .await?;

        if !data.ok {
            return Err(AuthError::UserNotFound(email.to_string()));
        }

        Ok(data.user_id)
    }

    async fn sign_in(
        &self,
        user_id: &str,
        team_id: &str,
        password: &str,
    ) -> Result<SigninResponse, AuthError> {
        let data: SigninResponse = self
            .post_form(
                "signin",
                &[("user", user_id), ("team", team_id), ("password", password)],
            )
            .await?;

        if !data.ok {
            return Err(AuthError::BadCredentials);
        }

        Ok(data)
    }

    pub async fn login_password(
        &self,
        email: &str,
        team_domain: &str,
        password: &str,
    ) -> Result<AuthInfo, AuthError> {
        let team_id = self.find_team(team_domain).await?;
        let user_id = self.find_user(email, &team_id).await?;
        let signin = self.sign_in(&user_id, &team_id, password).await?;

        Ok(AuthInfo {
            email: if signin.user_email.is_empty() {
                email.to_string()
            } else {
                signin.user_email
            },
            remote_user_id: RemoteUserId::new(if signin.user.is_empty() {
                user_id
            } else {
                signin.user
            }),
            team_name: team_domain.to_string(),
            team_id: TeamId::new(if signin.team.is_empty() {
                team_id
            } else {
                signin.team
            }),
            token: signin.token,
            cookie: None,
        })
    }
}

/// Direct-token flow: the token is verified against the remote network's
/// identity endpoint and normalized into the same [`AuthInfo`] shape.
pub async fn login_token(
    connector: &dyn RemoteConnector,
    token: &str,
    cookie: Option<&str>,
) -> Result<AuthInfo, AuthError> {
    let client = connector.client(token, cookie);
    let identity = client.verify_token().await.map_err(|err| match err {
        RemoteError::Api(_) | RemoteError::Unsupported(_) => AuthError::TokenRejected,
        RemoteError::Transport(message) => AuthError::Transport(message),
    })?;

    Ok(AuthInfo {
        email: identity.email,
        remote_user_id: identity.remote_user_id,
        team_name: identity.team_name,
        team_id: identity.team_id,
        token: token.to_string(),
        cookie: cookie.map(str::to_string),
    })
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
