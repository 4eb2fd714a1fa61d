use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "stresser", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Path to the SQLite database, defaults to the user data directory
    #[arg(long = "database", short = 'd')]
    pub database: Option<PathBuf>,
}

impl CliArgs {
    /// Load the configuration from the specified file, then fill secrets from the environment
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("Unable to open config file {path}"))?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)
                    .with_context(|| format!("Malformed config file {path}"))?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub generator: GeneratorConfig,
    pub stress: StressConfig,
    pub oauth: OAuthConfig,
    pub payment: PaymentConfig,
    pub mailer: MailerConfig,
}

impl Config {
    /// Overrides secrets and the bind port with values found by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |slot: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        };

        set(&mut self.auth.jwt_secret, "JWT_SECRET_KEY");
        set(&mut self.generator.api_key, "GEMINI_API_KEY");
        set(&mut self.payment.webhook_secret, "RAZORPAY_WEBHOOK_SECRET");
        set(&mut self.payment.key_id, "RAZORPAY_KEY_ID");
        set(&mut self.payment.key_secret, "RAZORPAY_KEY_SECRET");
        set(&mut self.oauth.google.client_id, "GOOGLE_CLIENT_ID");
        set(&mut self.oauth.google.client_secret, "GOOGLE_CLIENT_SECRET");
        set(&mut self.oauth.github.client_id, "GITHUB_CLIENT_ID");
        set(&mut self.oauth.github.client_secret, "GITHUB_CLIENT_SECRET");
        set(&mut self.mailer.api_key, "MAILER_API_KEY");

        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            self.server.bind_port = Some(port);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("JWT_SECRET_KEY must be set");
        }
        if self.auth.otp_max_attempts <= 0 {
            bail!("auth.otp_max_attempts must be positive");
        }
        if self.stress.max_attempts == 0 {
            bail!("stress.max_attempts must not be 0");
        }
        if self.stress.max_sessions == 0 {
            bail!("stress.max_sessions must not be 0");
        }
        if self.generator.api_key.is_empty() {
            log::warn!("GEMINI_API_KEY is not set, test case generation will fail");
        }
        if self.payment.webhook_secret.is_empty() {
            log::warn!("RAZORPAY_WEBHOOK_SECRET is not set, every webhook will be rejected");
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// Origin of the web frontend, used for CORS and OAuth redirects
    pub frontend_origin: String,
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            bind_port: None,
            frontend_origin: "http://localhost:3000".to_string(),
            secure_cookies: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub otp_ttl_secs: i64,
    pub otp_digits: u32,
    /// Wrong guesses allowed before a code is revoked
    pub otp_max_attempts: i64,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: 24 * 7,
            otp_ttl_secs: 180,
            otp_digits: 5,
            otp_max_attempts: 5,
            bcrypt_cost: 10,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: String::new(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StressConfig {
    pub compiler: String,
    pub compile_flags: Vec<String>,
    pub max_attempts: u32,
    pub run_timeout: MilliSecond,
    pub compile_timeout: MilliSecond,
    /// Upper bound of stress sessions running at the same time
    pub max_sessions: usize,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".to_string(),
            compile_flags: vec!["-O2".to_string(), "-std=c++17".to_string()],
            max_attempts: 10,
            run_timeout: MilliSecond(5_000),
            compile_timeout: MilliSecond(30_000),
            max_sessions: 4,
            scratch_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for std::time::Duration {
    fn from(value: MilliSecond) -> Self {
        std::time::Duration::from_millis(value.0)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct OAuthConfig {
    pub google: OAuthProviderConfig,
    pub github: OAuthProviderConfig,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl OAuthProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PaymentConfig {
    pub api_base: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub currency: String,
    pub plans: Vec<PlanConfig>,
}

impl PaymentConfig {
    pub fn plan(&self, name: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.name == name)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.razorpay.com".to_string(),
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            currency: "INR".to_string(),
            plans: vec![
                PlanConfig {
                    name: "monthly".to_string(),
                    amount: 9_900,
                    months: 1,
                },
                PlanConfig {
                    name: "yearly".to_string(),
                    amount: 99_900,
                    months: 12,
                },
            ],
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlanConfig {
    pub name: String,
    /// Price in the smallest currency unit (paise)
    pub amount: i64,
    pub months: u32,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MailerConfig {
    pub kind: MailerKind,
    pub endpoint: Option<String>,
    pub sender: String,
    pub api_key: String,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            kind: MailerKind::Log,
            endpoint: None,
            sender: "no-reply@localhost".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailerKind {
    Log,
    Http,
}
