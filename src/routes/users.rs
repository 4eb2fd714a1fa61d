use actix_web::{HttpResponse, get, put, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{ApiResponse, non_blank};
use crate::auth::AuthUser;
use crate::database::{self as db, User};
use crate::error::{ApiError, ApiResult};

const MAX_NAME_LENGTH: usize = 100;
const MAX_PICTURE_LENGTH: usize = 2048;

/// The part of a user record that clients get to see.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
    pub provider: String,
    pub is_premium: bool,
    pub premium_expires_at: Option<String>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        let is_premium = user.premium_active(Utc::now());
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            picture: user.picture,
            provider: user.provider,
            is_premium,
            premium_expires_at: user.premium_expires_at,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[get("/getCurrentUser")]
pub async fn get_current_user(
    user: AuthUser,
    pool: web::Data<SqlitePool>,
) -> ApiResult<HttpResponse> {
    let user = db::find_user_by_id(user.id, &pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(
        PublicUser::from(user),
        "User fetched successfully",
    )))
}

#[put("/updateUserDetails")]
pub async fn update_user_details(
    user: AuthUser,
    pool: web::Data<SqlitePool>,
    body: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    let name = non_blank(&body.name).map(str::trim);
    let picture = non_blank(&body.picture).map(str::trim);

    if name.is_some_and(|n| n.chars().count() > MAX_NAME_LENGTH) {
        return Err(ApiError::invalid(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if picture.is_some_and(|p| p.len() > MAX_PICTURE_LENGTH) {
        return Err(ApiError::invalid("picture url is too long"));
    }

    let updated = db::update_user_details(user.id, name, picture, &pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    log::info!("Updated details of user {}", updated.id);

    Ok(HttpResponse::Ok().json(ApiResponse::new(
        PublicUser::from(updated),
        "User details updated successfully",
    )))
}
