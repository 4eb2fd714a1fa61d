use actix_web::{HttpRequest, HttpResponse, get, post, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use super::ApiResponse;
use crate::auth::AuthUser;
use crate::config::PaymentConfig;
use crate::database::{self as db, Subscription};
use crate::error::{ApiError, ApiResult};
use crate::payment::{
    PaymentGateway, SIGNATURE_HEADER, WebhookAction, WebhookEvent, verify_signature,
};

#[derive(Deserialize, Debug)]
pub struct CreateSubscriptionRequest {
    pub plan: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOrder {
    pub subscription_id: i64,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    pub is_premium: bool,
    pub premium_expires_at: Option<String>,
    pub subscriptions: Vec<Subscription>,
}

/// Razorpay webhook. The signature covers the exact bytes received,
/// so the body is read raw and only parsed once it is verified.
#[post("/webhook")]
pub async fn razorpay_webhook(
    req: HttpRequest,
    body: web::Bytes,
    pool: web::Data<SqlitePool>,
    payment: web::Data<PaymentConfig>,
) -> ApiResult<HttpResponse> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::invalid("Missing signature"))?;

    if !verify_signature(&body, signature, &payment.webhook_secret) {
        log::warn!("Rejected webhook with invalid signature");
        return Err(ApiError::invalid("Invalid signature"));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid(format!("Malformed webhook payload: {e}")))?;

    match event.action() {
        WebhookAction::Captured {
            order_id,
            payment_id,
        } => match db::find_subscription_by_order(&order_id, &pool).await? {
            None => log::warn!("Payment {payment_id} captured for unknown order {order_id}"),
            Some(subscription) => {
                match db::mark_subscription_paid(subscription.id, &payment_id, Utc::now(), &pool)
                    .await?
                {
                    Some(paid) => log::info!(
                        "Order {order_id} paid, user {} is premium until {}",
                        paid.user_id,
                        paid.expires_at.as_deref().unwrap_or("-")
                    ),
                    None => log::info!("Order {order_id} was already paid"),
                }
            }
        },
        WebhookAction::Failed { order_id } => {
            let affected = db::mark_subscription_failed(&order_id, &pool).await?;
            log::info!("Order {order_id} failed, {affected} subscription(s) updated");
        }
        WebhookAction::Ignored => log::debug!("Ignoring webhook event {}", event.event),
    }

    Ok(HttpResponse::Ok().json(ApiResponse::new(json!({}), "Webhook processed successfully")))
}

#[post("/create")]
pub async fn create_subscription(
    user: AuthUser,
    pool: web::Data<SqlitePool>,
    payment: web::Data<PaymentConfig>,
    gateway: web::Data<dyn PaymentGateway>,
    body: web::Json<CreateSubscriptionRequest>,
) -> ApiResult<HttpResponse> {
    let plan = payment
        .plan(body.plan.trim())
        .ok_or_else(|| ApiError::invalid(format!("Unknown plan {}", body.plan)))?;

    if db::find_user_by_id(user.id, &pool).await?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let receipt = format!("u{}-{}", user.id, Utc::now().timestamp_millis());
    let order = gateway
        .create_order(plan.amount, &receipt)
        .await
        .map_err(|e| {
            log::error!("Unable to create order for user {}: {e:#}", user.id);
            ApiError::External("Unable to create payment order".to_string())
        })?;

    let subscription =
        db::create_subscription(user.id, &order.id, order.amount, plan.months, &pool).await?;
    log::info!(
        "User {} started checkout of plan {} with order {}",
        user.id,
        plan.name,
        order.id
    );

    Ok(HttpResponse::Ok().json(ApiResponse::new(
        CheckoutOrder {
            subscription_id: subscription.id,
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            key_id: gateway.key_id().to_string(),
        },
        "Order created successfully",
    )))
}

#[get("/status")]
pub async fn subscription_status(
    user: AuthUser,
    pool: web::Data<SqlitePool>,
) -> ApiResult<HttpResponse> {
    let account = db::find_user_by_id(user.id, &pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let subscriptions = db::subscriptions_for_user(user.id, &pool).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(
        SubscriptionStatusResponse {
            is_premium: account.premium_active(Utc::now()),
            premium_expires_at: account.premium_expires_at,
            subscriptions,
        },
        "Subscription status fetched successfully",
    )))
}
