use actix_web::cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, get, post, web};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use super::{ApiResponse, non_blank, normalize_email};
use crate::auth::{SessionManager, hash_password, verify_password};
use crate::config::{AuthConfig, ServerConfig};
use crate::database::{self as db, NewUser};
use crate::error::{ApiError, ApiResult};
use crate::mailer::OtpMailer;
use crate::oauth::{OAuthClient, Provider, generate_state};
use crate::otp::{OtpCheck, SubmittedOtp, check_otp, generate_otp};

const OAUTH_STATE_TTL_MINUTES: i64 = 10;

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub otp: Option<SubmittedOtp>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[post("/login")]
pub async fn login(
    pool: web::Data<SqlitePool>,
    sessions: web::Data<SessionManager>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let (Some(email), Some(password)) = (non_blank(&body.email), non_blank(&body.password)) else {
        return Err(ApiError::invalid("Email and Password are Required"));
    };
    let email = normalize_email(email);

    let user = db::find_user_by_email(&email, &pool)
        .await?
        .ok_or_else(|| ApiError::invalid("User doesn't exist with this mail id"))?;

    // OAuth accounts have no password to compare against
    let matches = match user.password.clone() {
        Some(hash) => verify_password(password.to_string(), hash).await?,
        None => false,
    };
    if !matches {
        log::warn!("Failed login for user {}", user.id);
        return Err(ApiError::invalid("Password is incorrect"));
    }

    let token = sessions.issue_token(user.id)?;
    log::info!("User {} logged in", user.id);

    Ok(HttpResponse::Ok()
        .cookie(sessions.session_cookie(token))
        .json(ApiResponse::new(json!({}), "successfully login")))
}

#[post("/signup")]
pub async fn signup(
    pool: web::Data<SqlitePool>,
    auth: web::Data<AuthConfig>,
    mailer: web::Data<dyn OtpMailer>,
    body: web::Json<SignupRequest>,
) -> ApiResult<HttpResponse> {
    let (Some(email), Some(_), Some(_)) = (
        non_blank(&body.email),
        non_blank(&body.name),
        non_blank(&body.password),
    ) else {
        return Err(ApiError::invalid("Fields are missing"));
    };
    let email = normalize_email(email);

    if db::find_user_by_email(&email, &pool).await?.is_some() {
        return Err(ApiError::Forbidden("User already exists".to_string()));
    }

    let otp = generate_otp(auth.otp_digits);
    db::insert_otp(&email, otp, &pool).await?;

    mailer.send_otp(&email, otp).await.map_err(|e| {
        log::error!("Unable to mail OTP to {email}: {e:#}");
        ApiError::External("failed to send the mail".to_string())
    })?;
    log::info!("OTP issued for {email}");

    Ok(HttpResponse::Ok().json(ApiResponse::new(json!({}), "OTP Sent Successfully")))
}

#[post("/verifyOTP")]
pub async fn verify_otp(
    pool: web::Data<SqlitePool>,
    auth: web::Data<AuthConfig>,
    sessions: web::Data<SessionManager>,
    body: web::Json<VerifyOtpRequest>,
) -> ApiResult<HttpResponse> {
    let (Some(otp), Some(email), Some(name), Some(password)) = (
        body.otp.as_ref(),
        non_blank(&body.email),
        non_blank(&body.name),
        non_blank(&body.password),
    ) else {
        return Err(ApiError::invalid("fields are missing"));
    };
    let email = normalize_email(email);

    let record = db::latest_otp(&email, &pool)
        .await?
        .ok_or_else(|| ApiError::invalid("otp not matched"))?;

    let submitted = otp
        .value()
        .ok_or_else(|| ApiError::Forbidden("OTP is incorrect".to_string()))?;
    let check = check_otp(&record, submitted, Utc::now(), Duration::seconds(auth.otp_ttl_secs));
    if check == OtpCheck::Expired {
        return Err(ApiError::invalid("time passed"));
    }

    // Claimed before comparing, so concurrent guesses cannot exceed the limit
    let Some(used) = db::claim_otp_attempt(record.id, auth.otp_max_attempts, &pool).await? else {
        db::delete_otps(&email, &pool).await?;
        return Err(ApiError::invalid("otp not matched"));
    };

    if check == OtpCheck::Mismatch {
        log::warn!("Wrong OTP submitted for {email} ({used}/{})", auth.otp_max_attempts);
        if used >= auth.otp_max_attempts {
            db::delete_otps(&email, &pool).await?;
            log::warn!("OTP for {email} revoked after {used} wrong guesses");
        }
        return Err(ApiError::Forbidden("OTP is incorrect".to_string()));
    }

    if db::find_user_by_email(&email, &pool).await?.is_some() {
        return Err(ApiError::Forbidden("User already exists".to_string()));
    }

    let password_hash = hash_password(password.to_string(), auth.bcrypt_cost).await?;
    let user = db::create_user(
        NewUser {
            name: name.trim(),
            email: &email,
            password_hash: Some(&password_hash),
            picture: None,
            provider: "password",
        },
        &pool,
    )
    .await
    .map_err(|e| {
        // Lost a race against a concurrent verification of the same address
        let duplicate = e
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());
        if duplicate {
            ApiError::Forbidden("User already exists".to_string())
        } else {
            ApiError::Database(e)
        }
    })?;

    let consumed = db::delete_otps(&email, &pool).await?;
    log::info!("Created user {} and consumed {consumed} OTP(s)", user.id);

    let token = sessions.issue_token(user.id)?;
    Ok(HttpResponse::Ok()
        .cookie(sessions.session_cookie(token))
        .json(ApiResponse::new(json!({}), "User successfully created")))
}

#[post("/logout")]
pub async fn logout(sessions: web::Data<SessionManager>) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(sessions.clear_cookie())
        .json(ApiResponse::new(json!({}), "successfully logout"))
}

#[get("/google/url")]
pub async fn google_url(
    oauth: web::Data<OAuthClient>,
    server: web::Data<ServerConfig>,
) -> ApiResult<HttpResponse> {
    authorization_redirect(Provider::Google, &oauth, &server)
}

#[get("/github/url")]
pub async fn github_url(
    oauth: web::Data<OAuthClient>,
    server: web::Data<ServerConfig>,
) -> ApiResult<HttpResponse> {
    authorization_redirect(Provider::Github, &oauth, &server)
}

#[get("/google/callback")]
pub async fn google_callback(
    req: HttpRequest,
    query: web::Query<OAuthCallbackQuery>,
    pool: web::Data<SqlitePool>,
    oauth: web::Data<OAuthClient>,
    sessions: web::Data<SessionManager>,
    server: web::Data<ServerConfig>,
) -> ApiResult<HttpResponse> {
    complete_sign_in(Provider::Google, &req, &query, &pool, &oauth, &sessions, &server).await
}

#[get("/github/callback")]
pub async fn github_callback(
    req: HttpRequest,
    query: web::Query<OAuthCallbackQuery>,
    pool: web::Data<SqlitePool>,
    oauth: web::Data<OAuthClient>,
    sessions: web::Data<SessionManager>,
    server: web::Data<ServerConfig>,
) -> ApiResult<HttpResponse> {
    complete_sign_in(Provider::Github, &req, &query, &pool, &oauth, &sessions, &server).await
}

fn authorization_redirect(
    provider: Provider,
    oauth: &OAuthClient,
    server: &ServerConfig,
) -> ApiResult<HttpResponse> {
    let state = generate_state();
    let url = oauth
        .authorization_url(provider, &state)
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    // Lax, the callback arrives as a top-level navigation from the provider
    let state_cookie = Cookie::build(provider.state_cookie(), state)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(server.secure_cookies)
        .max_age(CookieDuration::minutes(OAUTH_STATE_TTL_MINUTES))
        .finish();

    Ok(HttpResponse::Ok()
        .cookie(state_cookie)
        .json(ApiResponse::new(json!({ "url": url }), "authorization url")))
}

async fn complete_sign_in(
    provider: Provider,
    req: &HttpRequest,
    query: &OAuthCallbackQuery,
    pool: &SqlitePool,
    oauth: &OAuthClient,
    sessions: &SessionManager,
    server: &ServerConfig,
) -> ApiResult<HttpResponse> {
    if let Some(error) = &query.error {
        log::warn!("{} sign-in denied: {error}", provider.name());
        return Err(ApiError::Unauthorized(format!("{} sign-in was cancelled", provider.name())));
    }

    let code = non_blank(&query.code)
        .ok_or_else(|| ApiError::invalid("authorization code is missing"))?;

    let expected_state = req.cookie(provider.state_cookie());
    match (expected_state, query.state.as_deref()) {
        (Some(cookie), Some(state)) if !state.is_empty() && cookie.value() == state => {}
        _ => {
            log::warn!("{} callback with mismatched state", provider.name());
            return Err(ApiError::Forbidden("OAuth state mismatch".to_string()));
        }
    }

    let profile = oauth.fetch_profile(provider, code).await.map_err(|e| {
        log::error!("{} sign-in failed: {e:#}", provider.name());
        ApiError::External(format!("{} sign-in failed", provider.name()))
    })?;

    let user = db::upsert_oauth_user(
        &normalize_email(&profile.email),
        &profile.name,
        profile.picture.as_deref(),
        provider.name(),
        pool,
    )
    .await?;
    log::info!("User {} signed in with {}", user.id, provider.name());

    let token = sessions.issue_token(user.id)?;
    let mut clear_state = Cookie::build(provider.state_cookie(), "").path("/").finish();
    clear_state.make_removal();

    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, server.frontend_origin.clone()))
        .cookie(sessions.session_cookie(token))
        .cookie(clear_state)
        .finish())
}
