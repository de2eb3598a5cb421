//! Announcement Notification Worker (NATS JetStream)
//!
//! Consumes announcement events and emails every customer in the directory.
//!
//! ## Architecture
//!
//! ```text
//! NATS JetStream (NOTIFICATIONS stream, announcement.*)
//!   ↓ (Pull Consumer: notification-email)
//! NatsWorker<EmailEvent, EmailEventRouter>
//!   ↓ (event type)
//! AnnouncementCreatedUseCase
//!   ├─ TemplateLoader → rendered body
//!   ├─ RecipientResolver → user directory (retry + backoff)
//!   └─ EmailProvider (SMTP) → one send per recipient
//!
//! nak(10s) → redelivery, up to 5 deliveries
//! poison / exhausted → NOTIFICATIONS_DLQ
//! ```

use core_config::health::HealthServerConfig;
use core_config::nats::NatsConfig;
use core_config::{env_parse_or, ConfigError, Environment, FromEnv};
use email::{
    AnnouncementCreatedUseCase, BrandingConfig, DirectoryConfig, DispatchConfig, EmailEvent,
    EmailEventRouter, EmailProvider, FsTemplateLoader, HttpDirectoryClient, InMemoryTemplateStore,
    NotificationStream, RecipientResolver, SmtpConfig, SmtpProvider, TemplateLoader,
};
use eyre::{Result, WrapErr};
use messaging::nats::{HealthServer, NatsWorker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Everything the worker reads from the environment.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub nats: NatsConfig,
    pub health: HealthServerConfig,
    pub directory: DirectoryConfig,
    pub dispatch: DispatchConfig,
    pub branding: BrandingConfig,
    /// Unset means the embedded templates
    pub template_dir: Option<PathBuf>,
    pub max_concurrent_jobs: usize,
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            nats: NatsConfig::from_env()?,
            health: HealthServerConfig::from_env()?,
            directory: DirectoryConfig::from_env()?,
            dispatch: DispatchConfig::from_env()?,
            branding: BrandingConfig::from_env()?,
            template_dir: std::env::var("TEMPLATE_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            max_concurrent_jobs: env_parse_or("WORKER_MAX_CONCURRENT_JOBS", 4)?,
        })
    }
}

/// SMTP settings: explicit in production, Mailpit/MailHog fallback in development.
fn smtp_config(environment: &Environment) -> Result<SmtpConfig> {
    if environment.is_production() || std::env::var("SMTP_HOST").is_ok() {
        SmtpConfig::from_env().wrap_err("Invalid SMTP configuration")
    } else {
        info!("SMTP_HOST not set, using local Mailpit/MailHog");
        Ok(SmtpConfig::mailhog())
    }
}

fn template_loader(settings: &WorkerSettings) -> Arc<dyn TemplateLoader> {
    match &settings.template_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Loading templates from directory");
            Arc::new(FsTemplateLoader::new(dir.clone()))
        }
        None => {
            info!("Using embedded templates");
            Arc::new(InMemoryTemplateStore::with_defaults())
        }
    }
}

/// Run the notification worker
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev) and metrics
/// 2. Loads settings and builds the dispatch pipeline
/// 3. Connects to NATS and declares the stream, consumer and DLQ
/// 4. Processes messages until SIGINT/SIGTERM
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let metrics_handle = messaging::nats::metrics::init_metrics()
        .wrap_err("Failed to install Prometheus recorder")?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting announcement notification worker"
    );

    let settings = WorkerSettings::from_env().wrap_err("Invalid worker configuration")?;

    let provider = SmtpProvider::new(smtp_config(&environment)?)
        .wrap_err("Failed to create SMTP provider")?;
    if let Err(e) = provider.health_check().await {
        error!(error = %e, "SMTP server not reachable yet, sends will fail until it is");
    }

    let directory = HttpDirectoryClient::new(&settings.directory)
        .wrap_err("Failed to create directory client")?;
    let resolver = RecipientResolver::new(Arc::new(directory), settings.directory.retry.clone());

    let use_case = AnnouncementCreatedUseCase::new(
        template_loader(&settings),
        resolver,
        Arc::new(provider),
    )
    .with_branding(settings.branding.clone())
    .with_config(settings.dispatch.clone());
    let router = EmailEventRouter::new(Arc::new(use_case));

    info!(url = %settings.nats.url, "Connecting to NATS...");
    let nats_client = async_nats::connect(&settings.nats.url)
        .await
        .wrap_err_with(|| format!("Failed to connect to NATS at {}", settings.nats.url))?;
    let jetstream = async_nats::jetstream::new(nats_client);

    let worker_config =
        NotificationStream::worker_config().with_max_concurrent_jobs(settings.max_concurrent_jobs);

    info!(
        stream = %worker_config.stream_name,
        consumer = %worker_config.consumer_name,
        dlq = %worker_config.dlq_stream,
        "Worker configuration loaded"
    );

    let health_server = HealthServer::new(settings.health.address()).with_metrics(metrics_handle);
    let health_state = health_server.state();

    let worker = NatsWorker::<EmailEvent, _>::new(jetstream, router, worker_config)
        .await
        .wrap_err("Failed to create NATS worker")?
        .with_health(health_state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        health_state.begin_draining();
        let _ = shutdown_tx.send(true);
    });

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("NATS worker created, starting processing...");
    worker
        .run(shutdown_rx)
        .await
        .wrap_err("NATS worker failed")?;

    info!("Announcement notification worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_settings_from_env() {
        temp_env::with_vars(
            [
                ("DIRECTORY_SERVICE_URL", Some("http://main-service:8080")),
                ("TEMPLATE_DIR", Some("/etc/notification/templates")),
                ("WORKER_MAX_CONCURRENT_JOBS", Some("8")),
                ("EMAIL_SEND_TIMEOUT_SECS", Some("3")),
                ("NATS_URL", None),
                ("HEALTH_PORT", None),
            ],
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert_eq!(settings.nats.url, "nats://localhost:4222");
                assert_eq!(settings.health.port, 8081);
                assert_eq!(
                    settings.template_dir,
                    Some(PathBuf::from("/etc/notification/templates"))
                );
                assert_eq!(settings.max_concurrent_jobs, 8);
                assert_eq!(settings.dispatch.send_timeout, Duration::from_secs(3));
            },
        );
    }

    #[test]
    fn test_settings_require_directory_url() {
        temp_env::with_var_unset("DIRECTORY_SERVICE_URL", || {
            assert!(WorkerSettings::from_env().is_err());
        });
    }

    #[test]
    fn test_development_falls_back_to_mailhog() {
        temp_env::with_var_unset("SMTP_HOST", || {
            let config = smtp_config(&Environment::Development).unwrap();
            assert_eq!(config.port, 1025);
        });
    }

    #[test]
    fn test_production_requires_smtp() {
        temp_env::with_var_unset("SMTP_HOST", || {
            assert!(smtp_config(&Environment::Production).is_err());
        });
    }

    #[test]
    fn test_blank_template_dir_means_embedded() {
        temp_env::with_vars(
            [
                ("DIRECTORY_SERVICE_URL", Some("http://main-service:8080")),
                ("TEMPLATE_DIR", Some("  ")),
            ],
            || {
                assert_eq!(WorkerSettings::from_env().unwrap().template_dir, None);
            },
        );
    }
}
