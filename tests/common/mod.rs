#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use stresser::auth::SESSION_COOKIE;
use stresser::config::Config;
use stresser::database as db;
use stresser::generator::{CodeGenerator, ThinkingLevel};
use stresser::mailer::OtpMailer;
use stresser::payment::{Order, PaymentGateway};
use stresser::sandbox::{CheckOutcome, StressSandbox};
use stresser::stress::StressTester;
use stresser::web_server::AppState;

pub const WEBHOOK_SECRET: &str = "integration-webhook-secret";

/// Database file inside a temp dir, removed together with the guard
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn create_test_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_db(dir.path().join("stresser-test.sqlite3"))
        .await
        .unwrap();
    TestDb { pool, _dir: dir }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "integration-jwt-secret".to_string();
    config.auth.bcrypt_cost = 4;
    config.payment.webhook_secret = WEBHOOK_SECRET.to_string();
    config
}

#[derive(Default)]
pub struct CapturingMailer {
    pub sent: Mutex<Vec<(String, i64)>>,
    pub fail: bool,
}

impl CapturingMailer {
    pub fn last_otp(&self) -> Option<(String, i64)> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl OtpMailer for CapturingMailer {
    async fn send_otp(&self, email: &str, otp: i64) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp relay refused connection");
        }
        self.sent.lock().unwrap().push((email.to_string(), otp));
        Ok(())
    }
}

/// Hands out sequential order ids
#[derive(Default)]
pub struct FakeGateway {
    orders: AtomicU32,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, amount: i64, _receipt: &str) -> anyhow::Result<Order> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Order {
            id: format!("order_test_{n}"),
            amount,
            currency: "INR".to_string(),
        })
    }

    fn key_id(&self) -> &str {
        "rzp_test_key"
    }
}

/// Replays scripted generations, then returns empty text
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    pub levels: Mutex<Vec<ThinkingLevel>>,
}

impl ScriptedGenerator {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            levels: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, level: ThinkingLevel) -> anyhow::Result<String> {
        self.levels.lock().unwrap().push(level);
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Pretends every program prints its own source, except "silent" ones
pub struct EchoSandbox;

#[async_trait]
impl StressSandbox for EchoSandbox {
    async fn check(&self, source: &str) -> anyhow::Result<CheckOutcome> {
        let stdout = if source == "silent" {
            String::new()
        } else {
            source.to_string()
        };
        Ok(CheckOutcome::Finished {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
        })
    }
}

pub struct TestServices {
    pub state: AppState,
    pub mailer: Arc<CapturingMailer>,
    pub generator: Arc<ScriptedGenerator>,
}

pub fn test_services(config: &Config, pool: &SqlitePool, generations: &[&str]) -> TestServices {
    services_with_mailer(config, pool, generations, Arc::new(CapturingMailer::default()))
}

pub fn services_with_mailer(
    config: &Config,
    pool: &SqlitePool,
    generations: &[&str],
    mailer: Arc<CapturingMailer>,
) -> TestServices {
    let generator = ScriptedGenerator::new(generations);
    let stress = StressTester::new(
        generator.clone(),
        Arc::new(EchoSandbox),
        config.stress.max_attempts,
        config.stress.max_sessions,
    );
    let state = AppState::new(
        config,
        pool.clone(),
        mailer.clone(),
        Arc::new(FakeGateway::default()),
        stress,
    )
    .unwrap();

    TestServices {
        state,
        mailer,
        generator,
    }
}

pub fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<Cookie<'static>> {
    resp.response()
        .cookies()
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.into_owned())
}
