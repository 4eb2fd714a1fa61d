//! Google and GitHub authorization-code sign-in.

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use rand::Rng;
use reqwest::Url;
use serde::Deserialize;

use crate::config::{OAuthConfig, OAuthProviderConfig};

const STATE_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
        }
    }

    /// Cookie holding the anti-forgery state between redirect and callback
    pub fn state_cookie(self) -> &'static str {
        match self {
            Self::Google => "oauth_state_google",
            Self::Github => "oauth_state_github",
        }
    }

    fn authorize_endpoint(self) -> &'static str {
        match self {
            Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::Github => "https://github.com/login/oauth/authorize",
        }
    }

    fn token_endpoint(self) -> &'static str {
        match self {
            Self::Google => "https://oauth2.googleapis.com/token",
            Self::Github => "https://github.com/login/oauth/access_token",
        }
    }

    fn scope(self) -> &'static str {
        match self {
            Self::Google => "openid email profile",
            Self::Github => "read:user user:email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUser {
    email: Option<String>,
    verified_email: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub struct OAuthClient {
    http: reqwest::Client,
    google: OAuthProviderConfig,
    github: OAuthProviderConfig,
}

impl OAuthClient {
    pub fn new(config: &OAuthConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("stresser/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            google: config.google.clone(),
            github: config.github.clone(),
        })
    }

    fn provider_config(&self, provider: Provider) -> anyhow::Result<&OAuthProviderConfig> {
        let config = match provider {
            Provider::Google => &self.google,
            Provider::Github => &self.github,
        };
        if !config.is_configured() {
            bail!("{} sign-in is not configured", provider.name());
        }
        Ok(config)
    }

    pub fn authorization_url(&self, provider: Provider, state: &str) -> anyhow::Result<String> {
        let config = self.provider_config(provider)?;

        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("scope", provider.scope()),
            ("state", state),
        ];
        if provider == Provider::Google {
            params.extend([
                ("response_type", "code"),
                ("access_type", "online"),
                ("prompt", "select_account"),
            ]);
        }

        let url = Url::parse_with_params(provider.authorize_endpoint(), &params)?;
        Ok(url.into())
    }

    /// Exchanges an authorization code and fetches the signed-in profile.
    pub async fn fetch_profile(
        &self,
        provider: Provider,
        code: &str,
    ) -> anyhow::Result<OAuthProfile> {
        let access_token = self.exchange_code(provider, code).await?;
        match provider {
            Provider::Google => self.google_profile(&access_token).await,
            Provider::Github => self.github_profile(&access_token).await,
        }
    }

    async fn exchange_code(&self, provider: Provider, code: &str) -> anyhow::Result<String> {
        let config = self.provider_config(provider)?;
        let form = [
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response: TokenResponse = self
            .http
            .post(provider.token_endpoint())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .with_context(|| format!("{} token endpoint unreachable", provider.name()))?
            .json()
            .await
            .with_context(|| format!("malformed {} token response", provider.name()))?;

        match response {
            TokenResponse {
                access_token: Some(token),
                ..
            } => Ok(token),
            TokenResponse {
                error,
                error_description,
                ..
            } => Err(anyhow!(
                "{} rejected the code: {} {}",
                provider.name(),
                error.unwrap_or_default(),
                error_description.unwrap_or_default()
            )),
        }
    }

    async fn google_profile(&self, access_token: &str) -> anyhow::Result<OAuthProfile> {
        let user: GoogleUser = self
            .http
            .get("https://www.googleapis.com/oauth2/v2/userinfo")
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        google_user_to_profile(user)
    }

    async fn github_profile(&self, access_token: &str) -> anyhow::Result<OAuthProfile> {
        let user: GithubUser = self
            .http
            .get("https://api.github.com/user")
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The public profile email is optional on GitHub
        let emails = if user.email.is_none() {
            self.http
                .get("https://api.github.com/user/emails")
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<GithubEmail>>()
                .await?
        } else {
            Vec::new()
        };

        github_user_to_profile(user, &emails)
    }
}

fn google_user_to_profile(user: GoogleUser) -> anyhow::Result<OAuthProfile> {
    let email = user.email.context("Google account has no email")?;
    if user.verified_email == Some(false) {
        bail!("Google email {email} is not verified");
    }
    let name = user
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    Ok(OAuthProfile {
        email,
        name,
        picture: user.picture,
    })
}

fn github_user_to_profile(user: GithubUser, emails: &[GithubEmail]) -> anyhow::Result<OAuthProfile> {
    let email = user
        .email
        .or_else(|| {
            emails
                .iter()
                .find(|e| e.primary && e.verified)
                .or_else(|| emails.iter().find(|e| e.verified))
                .map(|e| e.email.clone())
        })
        .context("GitHub account has no verified email")?;

    Ok(OAuthProfile {
        email,
        name: user.name.filter(|n| !n.trim().is_empty()).unwrap_or(user.login),
        picture: user.avatar_url,
    })
}

pub fn generate_state() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..STATE_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(&OAuthConfig {
            google: OAuthProviderConfig {
                client_id: "gid".to_string(),
                client_secret: "gsecret".to_string(),
                redirect_uri: "http://localhost:3001/api/auth/google/callback".to_string(),
            },
            github: OAuthProviderConfig::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let url = client()
            .authorization_url(Provider::Google, "xyz")
            .unwrap();
        let url = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert!(pairs.contains(&("client_id".into(), "gid".into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
    }

    #[test]
    fn test_unconfigured_provider() {
        assert!(client().authorization_url(Provider::Github, "xyz").is_err());
    }

    #[test]
    fn test_google_profile_mapping() {
        let profile = google_user_to_profile(GoogleUser {
            email: Some("ada@example.com".into()),
            verified_email: Some(true),
            name: None,
            picture: Some("p.png".into()),
        })
        .unwrap();
        assert_eq!(profile.name, "ada");

        let unverified = google_user_to_profile(GoogleUser {
            email: Some("ada@example.com".into()),
            verified_email: Some(false),
            name: None,
            picture: None,
        });
        assert!(unverified.is_err());
    }

    #[test]
    fn test_github_prefers_primary_verified_email() {
        let user = GithubUser {
            login: "octo".into(),
            name: None,
            email: None,
            avatar_url: None,
        };
        let emails = [
            GithubEmail {
                email: "old@example.com".into(),
                primary: false,
                verified: true,
            },
            GithubEmail {
                email: "main@example.com".into(),
                primary: true,
                verified: true,
            },
        ];

        let profile = github_user_to_profile(user, &emails).unwrap();
        assert_eq!(profile.email, "main@example.com");
        assert_eq!(profile.name, "octo");
    }

    #[test]
    fn test_state_is_random() {
        let a = generate_state();
        assert_eq!(a.len(), STATE_LENGTH);
        assert_ne!(a, generate_state());
    }
}
