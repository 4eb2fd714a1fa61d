use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::auth::SessionManager;
use crate::config::{AuthConfig, Config, PaymentConfig, ServerConfig};
use crate::generator::GeminiClient;
use crate::mailer::{OtpMailer, create_mailer};
use crate::oauth::OAuthClient;
use crate::payment::{PaymentGateway, RazorpayClient};
use crate::routes::{
    create_subscription, get_current_user, get_test_case, github_callback, github_url,
    google_callback, google_url, health, json_error_handler, login, logout, query_error_handler,
    razorpay_webhook, signup, subscription_status, update_user_details, verify_otp,
};
use crate::sandbox::LocalSandbox;
use crate::stress::StressTester;

/// Everything the handlers pull out of `app_data`, shared across workers.
#[derive(Clone)]
pub struct AppState {
    pool: web::Data<SqlitePool>,
    sessions: web::Data<SessionManager>,
    auth: web::Data<AuthConfig>,
    server: web::Data<ServerConfig>,
    payment: web::Data<PaymentConfig>,
    oauth: web::Data<OAuthClient>,
    mailer: web::Data<dyn OtpMailer>,
    gateway: web::Data<dyn PaymentGateway>,
    stress: web::Data<StressTester>,
}

impl AppState {
    /// Wires the production services: Gemini, the local sandbox, the configured
    /// mailer and Razorpay.
    pub fn from_config(config: &Config, pool: SqlitePool) -> anyhow::Result<Self> {
        let generator = Arc::new(GeminiClient::new(&config.generator)?);
        let sandbox = Arc::new(LocalSandbox::build(&config.stress)?);
        let stress = StressTester::new(
            generator,
            sandbox,
            config.stress.max_attempts,
            config.stress.max_sessions,
        );

        Self::new(
            config,
            pool,
            create_mailer(&config.mailer)?,
            Arc::new(RazorpayClient::new(&config.payment)?),
            stress,
        )
    }

    pub fn new(
        config: &Config,
        pool: SqlitePool,
        mailer: Arc<dyn OtpMailer>,
        gateway: Arc<dyn PaymentGateway>,
        stress: StressTester,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            pool: web::Data::new(pool),
            sessions: web::Data::new(SessionManager::from_config(&config.auth, &config.server)),
            auth: web::Data::new(config.auth.clone()),
            server: web::Data::new(config.server.clone()),
            payment: web::Data::new(config.payment.clone()),
            oauth: web::Data::new(OAuthClient::new(&config.oauth)?),
            mailer: web::Data::from(mailer),
            gateway: web::Data::from(gateway),
            stress: web::Data::new(stress),
        })
    }

    /// Registers shared data and every route. Also used by the integration tests.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(self.pool.clone())
            .app_data(self.sessions.clone())
            .app_data(self.auth.clone())
            .app_data(self.server.clone())
            .app_data(self.payment.clone())
            .app_data(self.oauth.clone())
            .app_data(self.mailer.clone())
            .app_data(self.gateway.clone())
            .app_data(self.stress.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(health)
            .service(get_test_case)
            .service(
                web::scope("/api/auth")
                    .service(login)
                    .service(signup)
                    .service(verify_otp)
                    .service(logout)
                    .service(google_url)
                    .service(google_callback)
                    .service(github_url)
                    .service(github_callback),
            )
            .service(
                web::scope("/api/user")
                    .service(get_current_user)
                    .service(update_user_details),
            )
            .service(
                web::scope("/api/subscription")
                    .service(razorpay_webhook)
                    .service(create_subscription)
                    .service(subscription_status),
            );
    }
}

fn cors(frontend_origin: &str) -> Cors {
    Cors::default()
        .allowed_origin(frontend_origin)
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ])
        .supports_credentials()
        .max_age(3600)
}

pub fn build_server(server_config: &ServerConfig, state: AppState) -> std::io::Result<Server> {
    let frontend_origin = server_config.frontend_origin.clone();
    let bind_address = server_config
        .bind_address
        .clone()
        .unwrap_or("127.0.0.1".to_string());
    let bind_port = server_config.bind_port.unwrap_or(3001);
    log::info!("Listening on {bind_address}:{bind_port}, accepting {frontend_origin}");

    let server = HttpServer::new(move || {
        App::new()
            .configure(|cfg| state.configure(cfg))
            .wrap(cors(&frontend_origin))
            .wrap(middleware::Logger::default())
    })
    .bind((bind_address.as_str(), bind_port))?
    .run();

    Ok(server)
}
