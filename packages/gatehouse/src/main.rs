use std::{
    net::SocketAddr,
    sync::atomic::Ordering,
    time::{Duration, Instant},
};

use aerosol::Aero;
use atomic_time::AtomicInstant;
use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};
use gatehouse::{
    api,
    crypto::SecretCipher,
    db::Postgres,
    email::{self, EmailConfig},
    github::{self, GitHubApps},
    notify::Notifier,
    sweep,
};
use tap::Pipe;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_tree::time::FormatTime;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    #[command(subcommand)]
    command: Option<Command>,

    /// Database URL (Postgres)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Public URL of this deployment, used in invitation links and GitHub
    /// App manifests
    #[arg(long, env = "ACCESS_URL")]
    access_url: Option<Url>,

    /// Resend API key; email delivery is disabled without it
    #[arg(long, env = "RESEND_API_KEY", hide_env_values = true)]
    resend_api_key: Option<String>,

    /// Resend API base URL
    #[arg(long, env = "RESEND_API_URL", default_value = email::RESEND_API_URL)]
    resend_api_url: Url,

    /// Sender address for invitation emails
    #[arg(long, env = "EMAIL_FROM")]
    email_from: Option<String>,

    /// Sender display name for invitation emails
    #[arg(long, env = "EMAIL_FROM_NAME")]
    email_from_name: Option<String>,

    /// GitHub web URL
    #[arg(long, env = "GITHUB_URL", default_value = github::GITHUB_URL)]
    github_url: Url,

    /// GitHub REST API URL
    #[arg(long, env = "GITHUB_API_URL", default_value = github::GITHUB_API_URL)]
    github_api_url: Url,

    /// Hex encoded 256-bit key for encrypting provider secrets at rest
    #[arg(long, env = "EXTERNAL_AUTH_ENCRYPTION_KEY", hide_env_values = true)]
    external_auth_encryption_key: Option<String>,

    /// Seconds between background sweeps of expired records
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = sweep::DEFAULT_INTERVAL.as_secs())]
    sweep_interval_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, Subcommand)]
enum Command {
    /// Serve the API (the default)
    #[default]
    Serve,

    /// Apply pending database migrations
    Migrate,

    /// Expire stale invitations and clean up expired records once
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::parse();
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_tree::HierarchicalLayer::default()
                .with_indent_lines(true)
                .with_indent_amount(2)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_verbose_exit(false)
                .with_verbose_entry(false)
                .with_deferred_spans(true)
                .with_bracketed_fields(true)
                .with_span_retrace(true)
                .with_timer(Uptime::default())
                .with_targets(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let db = Postgres::connect(&config.database_url)
        .await
        .context("connect to database")?;

    match config.command.unwrap_or_default() {
        Command::Serve => serve(config, db).await,
        Command::Migrate => db.migrate().await,
        Command::Sweep => sweep::once(&db).await.map(drop),
    }
}

async fn serve(config: Config, db: Postgres) -> Result<()> {
    db.validate_migrations().await?;

    let cipher = SecretCipher::from_optional_hex(config.external_auth_encryption_key.as_deref())
        .context("load external auth encryption key")?;
    match cipher.key_id() {
        Some(key_id) => info!(%key_id, "external_auth.encryption.enabled"),
        None => warn!("external_auth.encryption.disabled"),
    }
    let unreadable = api::v2::external_auth::unreadable_providers(&db, &cipher)
        .await
        .context("check stored provider secrets")?;
    if !unreadable.is_empty() {
        warn!(?unreadable, "external_auth.secrets.unreadable");
    }

    let email = EmailConfig {
        api_key: config.resend_api_key,
        from_email: config.email_from,
        from_name: config.email_from_name,
        access_url: config.access_url.clone(),
    };
    let notifier = Notifier::spawn(&email, &config.resend_api_url)?;
    let github = GitHubApps::new(config.github_url, config.github_api_url, config.access_url)?;

    Duration::from_secs(config.sweep_interval_secs)
        .pipe(|interval| sweep::run(db.clone(), interval))
        .pipe(tokio::spawn);

    let state = Aero::new()
        .with(github)
        .with(cipher)
        .with(notifier)
        .with(db);
    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Prints the overall latency and latency between tracing events.
struct Uptime {
    start: Instant,
    prior: AtomicInstant,
}

impl Uptime {
    /// Get the [`Duration`] since the last time this function was called.
    /// Uses relaxed atomic ordering; this isn't meant to be super precise-
    /// just fast to run and good enough for humans to eyeball.
    ///
    /// If the function hasn't yet been called, it returns the time
    /// since the overall [`Uptime`] struct was created.
    fn elapsed_since_prior(&self) -> Duration {
        const RELAXED: Ordering = Ordering::Relaxed;
        self.prior
            .fetch_update(RELAXED, RELAXED, |_| Some(Instant::now()))
            .unwrap_or_else(|_| Instant::now())
            .pipe(|prior| prior.elapsed())
    }
}

impl Default for Uptime {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            prior: AtomicInstant::now(),
        }
    }
}

impl FormatTime for Uptime {
    // Prints the total runtime for the program.
    fn format_time(&self, w: &mut impl std::fmt::Write) -> std::fmt::Result {
        let elapsed = self.start.elapsed();
        let seconds = elapsed.as_secs_f64();
        write!(w, "{seconds:.03}s")
    }

    // Elapsed here is the total time _in this span_,
    // but we want "the time since the last message was printed"
    // so we use `self.prior`.
    fn style_timestamp(
        &self,
        _ansi: bool,
        _elapsed: Duration,
        w: &mut impl std::fmt::Write,
    ) -> std::fmt::Result {
        let elapsed = self.elapsed_since_prior().as_millis();
        write!(w, "{elapsed: >3}ms")
    }
}
