use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::{create_timestamp, format_timestamp, parse_timestamp};

const DATABASE_NAME: &str = "stresser.sqlite3";

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// bcrypt hash, absent for accounts created through OAuth
    pub password: Option<String>,
    pub picture: Option<String>,
    pub provider: String,
    pub is_premium: bool,
    pub premium_expires_at: Option<String>,
    pub created_at: String,
}

impl User {
    /// Premium is active only while the stored expiry lies in the future.
    pub fn premium_active(&self, now: DateTime<Utc>) -> bool {
        self.is_premium
            && self
                .premium_expires_at
                .as_deref()
                .and_then(parse_timestamp)
                .is_none_or(|expiry| expiry > now)
    }
}

pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub picture: Option<&'a str>,
    pub provider: &'a str,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct OtpRecord {
    pub id: i64,
    pub email: String,
    pub otp: i64,
    /// Submissions already compared against this code
    pub attempts: i64,
    pub created_at: String,
}

#[derive(sqlx::Type, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub razorpay_order_id: String,
    pub razorpay_payment_id: Option<String>,
    pub amount: i64,
    pub months: i64,
    pub status: SubscriptionStatus,
    pub created_at: String,
    pub expires_at: Option<String>,
}

pub fn get_db_path() -> anyhow::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "stresser").context("Unable to find user directory")?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).context("Failed to create local data dir")?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    // Pragmas live in the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path.as_ref())
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(2))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .connect_with(options)
        .await?;

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS users (
            id                  INTEGER  PRIMARY KEY AUTOINCREMENT,
            name                TEXT     NOT NULL,
            email               TEXT     NOT NULL UNIQUE,
            password            TEXT,
            picture             TEXT,
            provider            TEXT     NOT NULL DEFAULT 'password',
            is_premium          INTEGER  NOT NULL DEFAULT 0,
            premium_expires_at  TEXT,
            created_at          TEXT     NOT NULL
        );",
        r"
        CREATE TABLE IF NOT EXISTS otps (
            id          INTEGER  PRIMARY KEY AUTOINCREMENT,
            email       TEXT     NOT NULL,
            otp         INTEGER  NOT NULL,
            attempts    INTEGER  NOT NULL DEFAULT 0,
            created_at  TEXT     NOT NULL
        );",
        "CREATE INDEX IF NOT EXISTS idx_otps_email ON otps(email, created_at);",
        r"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id                   INTEGER  PRIMARY KEY AUTOINCREMENT,
            user_id              INTEGER  NOT NULL,
            razorpay_order_id    TEXT     NOT NULL UNIQUE,
            razorpay_payment_id  TEXT,
            amount               INTEGER  NOT NULL,
            months               INTEGER  NOT NULL,
            status               TEXT     NOT NULL,
            created_at           TEXT     NOT NULL,
            expires_at           TEXT,
            FOREIGN KEY (user_id)  REFERENCES users (id)
        );",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

// ------------------------------------------------------------------ users

pub async fn find_user_by_email(email: &str, pool: &SqlitePool) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn find_user_by_id(id: i64, pool: &SqlitePool) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn create_user(user: NewUser<'_>, pool: &SqlitePool) -> sqlx::Result<User> {
    let now = create_timestamp();

    let id = sqlx::query(
        r#"
        INSERT INTO users (name, email, password, picture, provider, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.name)
    .bind(user.email)
    .bind(user.password_hash)
    .bind(user.picture)
    .bind(user.provider)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    log::debug!("Created user {id} via {}", user.provider);

    find_user_by_id(id, pool)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Returns the account for `email`, creating an OAuth account on first sign-in.
///
/// An existing account keeps its name; a missing picture is filled from the provider.
pub async fn upsert_oauth_user(
    email: &str,
    name: &str,
    picture: Option<&str>,
    provider: &str,
    pool: &SqlitePool,
) -> sqlx::Result<User> {
    if let Some(existing) = find_user_by_email(email, pool).await? {
        if existing.picture.is_none() && picture.is_some() {
            sqlx::query("UPDATE users SET picture = ? WHERE id = ?")
                .bind(picture)
                .bind(existing.id)
                .execute(pool)
                .await?;
            return find_user_by_id(existing.id, pool)
                .await?
                .ok_or(sqlx::Error::RowNotFound);
        }
        return Ok(existing);
    }

    create_user(
        NewUser {
            name,
            email,
            password_hash: None,
            picture,
            provider,
        },
        pool,
    )
    .await
}

/// `None` fields keep their stored value. Returns `None` when the user does not exist.
pub async fn update_user_details(
    id: i64,
    name: Option<&str>,
    picture: Option<&str>,
    pool: &SqlitePool,
) -> sqlx::Result<Option<User>> {
    let affected = sqlx::query(
        r#"
        UPDATE users
        SET name = COALESCE(?, name), picture = COALESCE(?, picture)
        WHERE id = ?
        "#,
    )
    .bind(name)
    .bind(picture)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        return Ok(None);
    }
    find_user_by_id(id, pool).await
}

// ------------------------------------------------------------------- otps

pub async fn insert_otp(email: &str, otp: i64, pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO otps (email, otp, created_at) VALUES (?, ?, ?)")
        .bind(email)
        .bind(otp)
        .bind(create_timestamp())
        .execute(pool)
        .await?;
    Ok(())
}

/// The most recently issued OTP for `email`
pub async fn latest_otp(email: &str, pool: &SqlitePool) -> sqlx::Result<Option<OtpRecord>> {
    sqlx::query_as::<_, OtpRecord>(
        r#"
        SELECT id, email, otp, attempts, created_at FROM otps
        WHERE email = ?
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

/// Uses up one guess on the code. Returns the guesses used so far, or `None`
/// once `max_attempts` is reached.
pub async fn claim_otp_attempt(
    otp_id: i64,
    max_attempts: i64,
    pool: &SqlitePool,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar(
        "UPDATE otps SET attempts = attempts + 1 WHERE id = ? AND attempts < ? RETURNING attempts",
    )
    .bind(otp_id)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await
}

pub async fn delete_otps(email: &str, pool: &SqlitePool) -> sqlx::Result<u64> {
    let deleted = sqlx::query("DELETE FROM otps WHERE email = ?")
        .bind(email)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted)
}

// ---------------------------------------------------------- subscriptions

pub async fn create_subscription(
    user_id: i64,
    order_id: &str,
    amount: i64,
    months: u32,
    pool: &SqlitePool,
) -> sqlx::Result<Subscription> {
    let id = sqlx::query(
        r#"
        INSERT INTO subscriptions (user_id, razorpay_order_id, amount, months, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(order_id)
    .bind(amount)
    .bind(months as i64)
    .bind(SubscriptionStatus::Pending)
    .bind(create_timestamp())
    .execute(pool)
    .await?
    .last_insert_rowid();

    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn find_subscription_by_order(
    order_id: &str,
    pool: &SqlitePool,
) -> sqlx::Result<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE razorpay_order_id = ?")
        .bind(order_id)
        .fetch_optional(pool)
        .await
}

pub async fn subscriptions_for_user(
    user_id: i64,
    pool: &SqlitePool,
) -> sqlx::Result<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Marks the subscription paid and grants premium to its owner in one transaction.
///
/// The new expiry extends an unexpired premium period rather than restarting it.
/// Returns `None` if the subscription was already paid.
pub async fn mark_subscription_paid(
    subscription_id: i64,
    payment_id: &str,
    now: DateTime<Utc>,
    pool: &SqlitePool,
) -> sqlx::Result<Option<Subscription>> {
    let mut tx = pool.begin().await?;

    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = ?")
            .bind(subscription_id)
            .fetch_one(tx.as_mut())
            .await?;

    if subscription.status == SubscriptionStatus::Paid {
        return Ok(None);
    }

    let current_expiry: Option<String> =
        sqlx::query_scalar("SELECT premium_expires_at FROM users WHERE id = ? AND is_premium = 1")
            .bind(subscription.user_id)
            .fetch_optional(tx.as_mut())
            .await?
            .flatten();

    let start = current_expiry
        .as_deref()
        .and_then(parse_timestamp)
        .filter(|expiry| *expiry > now)
        .unwrap_or(now);
    let expires_at = start
        .checked_add_months(Months::new(subscription.months as u32))
        .unwrap_or(start);
    let expires_at = format_timestamp(expires_at);

    sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = ?, razorpay_payment_id = ?, expires_at = ?
        WHERE id = ?
        "#,
    )
    .bind(SubscriptionStatus::Paid)
    .bind(payment_id)
    .bind(&expires_at)
    .bind(subscription_id)
    .execute(tx.as_mut())
    .await?;

    sqlx::query("UPDATE users SET is_premium = 1, premium_expires_at = ? WHERE id = ?")
        .bind(&expires_at)
        .bind(subscription.user_id)
        .execute(tx.as_mut())
        .await?;

    tx.commit().await?;

    Ok(Some(Subscription {
        status: SubscriptionStatus::Paid,
        razorpay_payment_id: Some(payment_id.to_string()),
        expires_at: Some(expires_at),
        ..subscription
    }))
}

/// Returns the number of subscriptions marked failed. Paid ones are left untouched.
pub async fn mark_subscription_failed(order_id: &str, pool: &SqlitePool) -> sqlx::Result<u64> {
    let affected = sqlx::query(
        "UPDATE subscriptions SET status = ? WHERE razorpay_order_id = ? AND status != ?",
    )
    .bind(SubscriptionStatus::Failed)
    .bind(order_id)
    .bind(SubscriptionStatus::Paid)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(is_premium: bool, expiry: Option<DateTime<Utc>>) -> User {
        User {
            id: 1,
            name: "n".into(),
            email: "e@x".into(),
            password: None,
            picture: None,
            provider: "password".into(),
            is_premium,
            premium_expires_at: expiry.map(format_timestamp),
            created_at: create_timestamp(),
        }
    }

    #[test]
    fn test_premium_active() {
        let now = Utc::now();
        assert!(!user(false, None).premium_active(now));
        assert!(user(true, None).premium_active(now));
        assert!(user(true, Some(now + Duration::days(3))).premium_active(now));
        assert!(!user(true, Some(now - Duration::seconds(1))).premium_active(now));
    }
}
