//! Accounts server entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use accounts_core::tasks::{TASK_SEND_PASSWORD_RESET_EMAIL, TASK_SEND_VERIFY_EMAIL};
use accounts_core::TranslationStore;
use accounts_server::config::{load_translations, AppConfig, ConfigStore};
use accounts_server::mailer::{EmailComposer, LogMailer, Mailer};
use accounts_server::network::{NetworkConfig, NetworkModule};
use accounts_server::oauth::HttpOAuthProvider;
use accounts_server::objects::MemoryObjectStore;
use accounts_server::security::JwtValidator;
use accounts_server::service::{build_call_pipeline, Accounts, ContextBuilder, ServiceConfig, TracingAuditSink};
use accounts_server::store::{MemoryStore, UsersStore};
use accounts_server::tasks::{
    Broker, MemoryBroker, ProcessorConfig, SendPasswordResetEmailHandler, SendVerifyEmailHandler, TaskDistributor,
    TaskProcessor,
};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "accounts-server", version, about = "User accounts RPC server")]
struct Args {
    #[arg(long, env = "ACCOUNTS_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "ACCOUNTS_PORT", default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "ACCOUNTS_ENV", default_value = "dev")]
    env: String,
    #[arg(long, env = "ACCOUNTS_SERVER_NAME", default_value = "accounts")]
    server_name: String,

    #[arg(long, env = "ACCOUNTS_TRANSLATIONS_DIR", default_value = "translations")]
    translations_dir: PathBuf,
    #[arg(long, env = "ACCOUNTS_DEFAULT_LOCALE", default_value = "en")]
    default_locale: String,
    #[arg(long, env = "ACCOUNTS_LOCALES", value_delimiter = ',', default_value = "en")]
    locales: Vec<String>,

    #[arg(long, env = "ACCOUNTS_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    #[arg(long, env = "ACCOUNTS_OAUTH_ADMIN_URL", default_value = "http://127.0.0.1:4445")]
    oauth_admin_url: String,
    #[arg(long, env = "ACCOUNTS_FILE_BUCKET", default_value = "users")]
    file_bucket: String,

    /// Postgres URL. Without it accounts live in memory.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    /// redb file for the task queue. Without it tasks live in memory.
    #[arg(long, env = "ACCOUNTS_QUEUE_PATH")]
    queue_path: Option<PathBuf>,
    #[arg(long, env = "ACCOUNTS_WORKERS", default_value_t = 10)]
    workers: usize,

    #[arg(long, env = "ACCOUNTS_SITE_NAME", default_value = "Accounts")]
    site_name: String,
    #[arg(long, env = "ACCOUNTS_CONFIRMATION_URL", default_value = "http://localhost:3000/email-confirmation")]
    confirmation_url: String,
    #[arg(long, env = "ACCOUNTS_PASSWORD_RESET_URL", default_value = "http://localhost:3000/password-reset")]
    password_reset_url: String,

    #[arg(long, env = "ACCOUNTS_CALL_TIMEOUT_SECS", default_value_t = 30)]
    call_timeout_secs: u64,
    #[arg(long, env = "ACCOUNTS_MAX_CONCURRENT_CALLS", default_value_t = 1000)]
    max_concurrent_calls: u32,

    #[arg(long, env = "ACCOUNTS_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Args {
    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.main.env.clone_from(&self.env);
        config.main.server_name.clone_from(&self.server_name);
        config.localization.default_locale.clone_from(&self.default_locale);
        config.localization.available_locales.clone_from(&self.locales);
        config.security.jwt_secret.clone_from(&self.jwt_secret);
        config.oauth.admin_url.clone_from(&self.oauth_admin_url);
        config.file.bucket.clone_from(&self.file_bucket);
        config
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "accounts_server=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn open_store(url: Option<&str>) -> anyhow::Result<Arc<dyn UsersStore>> {
    match url {
        None => {
            warn!("no database configured, accounts are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await?;
            info!("connected to postgres");
            Ok(Arc::new(accounts_server::store::PgStore::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => anyhow::bail!("DATABASE_URL is set but the server was built without the `postgres` feature"),
    }
}

fn open_broker(path: Option<&std::path::Path>) -> anyhow::Result<Arc<dyn Broker>> {
    match path {
        None => {
            warn!("no queue path configured, tasks are kept in memory");
            Ok(Arc::new(MemoryBroker::new()))
        }
        #[cfg(feature = "redb")]
        Some(path) => {
            info!(path = %path.display(), "opening task queue");
            Ok(Arc::new(accounts_server::tasks::RedbBroker::open(path)?))
        }
        #[cfg(not(feature = "redb"))]
        Some(_) => anyhow::bail!("a queue path is set but the server was built without the `redb` feature"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = Arc::new(ConfigStore::new(args.app_config()));
    let translations = Arc::new(TranslationStore::new(load_translations(
        &args.translations_dir,
        &args.default_locale,
    )?));
    info!(env = %args.env, locales = ?args.locales, "starting accounts server");

    let store = open_store(args.database_url.as_deref()).await?;
    let broker = open_broker(args.queue_path.as_deref())?;

    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer::new(EmailComposer::new(
        Arc::clone(&translations),
        args.site_name.clone(),
        args.confirmation_url.clone(),
        args.password_reset_url.clone(),
    )));
    let mut processor = TaskProcessor::new(
        Arc::clone(&broker),
        Arc::clone(&translations),
        ProcessorConfig {
            concurrency: args.workers,
            ..ProcessorConfig::default()
        },
    );
    processor.register(TASK_SEND_VERIFY_EMAIL, Arc::new(SendVerifyEmailHandler::new(Arc::clone(&mailer))));
    processor.register(
        TASK_SEND_PASSWORD_RESET_EMAIL,
        Arc::new(SendPasswordResetEmailHandler::new(Arc::clone(&mailer))),
    );
    processor.start();

    let oauth = HttpOAuthProvider::new(reqwest::Client::new(), Arc::clone(&config));
    let accounts = Arc::new(Accounts::new(
        store,
        TaskDistributor::new(broker),
        Arc::new(oauth),
        Arc::new(MemoryObjectStore::new()),
        Arc::clone(&config),
        Arc::new(TracingAuditSink),
    ));

    let service_config = ServiceConfig {
        default_call_timeout: Duration::from_secs(args.call_timeout_secs),
        max_concurrent_calls: args.max_concurrent_calls,
        ..ServiceConfig::default()
    };
    let pipeline = build_call_pipeline(
        accounts.router(),
        Arc::new(ContextBuilder::new(Arc::clone(&config), Arc::clone(&translations))),
        Arc::new(JwtValidator::new(args.jwt_secret.as_bytes())),
        &service_config,
    );

    let mut network = NetworkModule::new(
        NetworkConfig {
            host: args.host.clone(),
            port: args.port,
            ..NetworkConfig::default()
        },
        pipeline,
    );
    network.start().await?;
    let served = network.serve(shutdown_signal()).await;

    processor.shutdown().await;
    served
}
