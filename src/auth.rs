//! Password hashing, session tokens and the authenticated-user extractor.

use std::future::{Ready, ready};

use actix_web::cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use actix_web::{FromRequest, HttpRequest, dev::Payload, http::header, web};
use anyhow::anyhow;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::{AuthConfig, ServerConfig};
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub iat: usize,
    pub exp: usize,
}

/// Issues and verifies HS256 session tokens and builds the matching cookies.
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure_cookies: bool,
}

impl SessionManager {
    pub fn new(secret: &str, ttl: Duration, secure_cookies: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            secure_cookies,
        }
    }

    pub fn from_config(auth: &AuthConfig, server: &ServerConfig) -> Self {
        Self::new(
            &auth.jwt_secret,
            Duration::hours(auth.token_ttl_hours),
            server.secure_cookies,
        )
    }

    pub fn issue_token(&self, user_id: i64) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.ttl).timestamp().max(0) as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Returns the user id carried by a valid, unexpired token.
    pub fn verify_token(&self, token: &str) -> anyhow::Result<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| anyhow!("token validation failed: {e}"))?;

        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| anyhow!("token subject is not a user id"))
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, token)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure_cookies)
            .max_age(CookieDuration::seconds(self.ttl.num_seconds()))
            .finish()
    }

    pub fn clear_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(SESSION_COOKIE, "")
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure_cookies)
            .finish();
        cookie.make_removal();
        cookie
    }
}

pub async fn hash_password(password: String, cost: u32) -> anyhow::Result<String> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hashed)
}

pub async fn verify_password(password: String, hash: String) -> anyhow::Result<bool> {
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(matches)
}

/// The user behind the request's session cookie or bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
}

impl AuthUser {
    fn extract(req: &HttpRequest) -> Result<Self, ApiError> {
        let sessions = req
            .app_data::<web::Data<SessionManager>>()
            .ok_or_else(|| anyhow!("SessionManager is not registered"))?;

        let token = req
            .cookie(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| bearer_token(req))
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized request".to_string()))?;

        match sessions.verify_token(&token) {
            Ok(id) => Ok(Self { id }),
            Err(e) => {
                log::warn!("Rejected session token: {e}");
                Err(ApiError::Unauthorized("Invalid or expired token".to_string()))
            }
        }
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Self::extract(req))
    }
}
