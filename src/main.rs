//! tiergate - entitlement and payment-confirmation service

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiergate::{
    api::{self, AppState},
    config::Config,
    db::{
        self,
        repositories::{
            SqlxAccountRepository, SqlxCheckoutRepository, SqlxEmailVerificationRepository,
            SqlxLegacyExchangeRepository, SqlxSessionRepository,
        },
    },
    gateway::{HttpContentProvider, HttpIdentityProvider, Mailer, SmtpMailer, StripeCheckoutGateway},
    services::{
        AccessController, AuthGateway, DynClock, EntitlementEvaluator, PaymentReconciler,
        RetryPolicy, SessionStore, SystemClock, TrialClock,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiergate=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tiergate...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {}", config.database.url);

    // Run migrations
    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!(applied, "Database migrations completed");

    let clock: DynClock = Arc::new(SystemClock);
    let trial_clock = TrialClock::new(config.trial.days);

    // Initialize external gateways
    if config.payment.secret_key.is_empty() {
        tracing::warn!("payment.secret_key is empty, checkout is disabled");
    }
    let payment_gateway = Arc::new(
        StripeCheckoutGateway::new(&config.payment.api_base, &config.payment.secret_key)
            .context("Failed to build payment gateway client")?,
    );
    let identity = Arc::new(
        HttpIdentityProvider::new(config.legacy.session_data_url.clone())
            .context("Failed to build identity provider client")?,
    );
    let content = Arc::new(
        HttpContentProvider::new(config.content.base_url.clone())
            .context("Failed to build content provider client")?,
    );
    let mailer: Option<Arc<dyn Mailer>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(SmtpMailer::new(smtp)?) as Arc<dyn Mailer>),
        None => {
            tracing::warn!("smtp is not configured, email verification is disabled");
            None
        }
    };

    // Initialize services
    let accounts = SqlxAccountRepository::boxed(pool.clone());
    let sessions = Arc::new(SessionStore::new(
        SqlxSessionRepository::boxed(pool.clone()),
        clock.clone(),
        config.session.expiration_days,
    ));

    let auth = Arc::new(AuthGateway::new(
        accounts,
        sessions.clone(),
        SqlxLegacyExchangeRepository::boxed(pool.clone()),
        SqlxEmailVerificationRepository::boxed(pool.clone()),
        identity,
        mailer,
        trial_clock,
        clock.clone(),
        config.auth.min_password_length,
    ));
    let payments = Arc::new(
        PaymentReconciler::new(
            SqlxCheckoutRepository::boxed(pool.clone()),
            payment_gateway,
            config.payment.packages.clone(),
            clock.clone(),
        )
        .with_async_payment_window(chrono::Duration::hours(
            config.payment.async_payment_window_hours,
        )),
    );
    let access = Arc::new(AccessController::new(
        auth,
        payments,
        EntitlementEvaluator::new(config.auth.master_username.clone()),
        trial_clock,
        clock.clone(),
        content.clone(),
        content,
        RetryPolicy::from_config(&config.payment),
    ));

    // Create app state
    let state = AppState {
        pool: pool.clone(),
        access,
        clock,
        webhook_secret: Arc::new(config.payment.webhook_secret.clone()),
    };

    // Start expired session and failed-attempt purge task
    if config.session.purge_interval_secs > 0 {
        let sessions = sessions.clone();
        let access = state.access.clone();
        let period = tokio::time::Duration::from_secs(config.session.purge_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match sessions.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "expired sessions purged"),
                    Err(e) => tracing::warn!(error = %e, "session purge failed"),
                }
                access.auth().cleanup_rate_limits().await;
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    pool.close().await;
    Ok(())
}
