//! Extension worker.
//!
//! `gradepush-worker run` (the default) consumes the RAA and EC queues and
//! drives the deferred task table until interrupted. The other subcommands
//! are one-shot admin operations against the same database.
//!
//! ```bash
//! gradepush-worker scan --course-id 0 --extension-type both
//! gradepush-worker register-mapping --course-id 7 --activity-type assign \
//!     --activity-instance-id 310 --map-code LAWS0024A6UF --mab-seq 001
//! gradepush-worker enqueue-mapping --mapping-id 42
//! gradepush-worker record-enrolment --course-id 7 --user-id 1050
//! gradepush-worker remove-mapping --mapping-id 42
//! gradepush-worker list-failed --limit 20
//! gradepush-worker retry-message --id 314
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gradepush_core::activity::ActivityType;
use gradepush_core::scan::{ExtensionScope, ScanRequest};
use gradepush_core::types::DbId;
use gradepush_db::models::component_grade::CreateComponentGrade;
use gradepush_db::models::mapping::RegisterMapping;
use gradepush_db::models::status::MessageStatus;
use gradepush_extensions::applier::ExtensionApplier;
use gradepush_extensions::clock::SystemClock;
use gradepush_extensions::engine::ExtensionEngine;
use gradepush_extensions::lms::{ActivityRegistry, LmsRestClient, RestActivityStore};
use gradepush_extensions::processor::{self, QueueProcessor};
use gradepush_extensions::queue::SqsMessageQueue;
use gradepush_extensions::records::SitsApiClient;
use gradepush_extensions::rescan::{RescanConfig, Rescanner};
use gradepush_extensions::resolver::MappingResolver;
use gradepush_extensions::store::{ExtensionStore, PgExtensionStore};
use gradepush_extensions::tasks::{self, TaskRunner};

use config::{LogFormat, WorkerConfig};

const DEFAULT_LOG_FILTER: &str = "gradepush_worker=debug,gradepush_extensions=debug";

/// How long each loop gets to finish its current unit after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "gradepush-worker")]
#[command(version)]
#[command(about = "Applies student extensions from the records system to LMS activities")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queue consumers and the task runner until interrupted
    Run,

    /// Queue a full re-scan of extension-enabled mappings
    Scan {
        /// Course to scan, or 0 for every course
        #[arg(long)]
        course_id: DbId,

        /// Extension family to scan: raa, ec or both
        #[arg(long, default_value = "both")]
        extension_type: String,
    },

    /// Create a mapping (and its component) and queue its backfill
    RegisterMapping {
        #[arg(long)]
        course_id: DbId,

        /// assign, quiz, lesson, lti, coursework or turnitin
        #[arg(long)]
        activity_type: String,

        #[arg(long)]
        activity_instance_id: DbId,

        #[arg(long)]
        map_code: String,

        #[arg(long)]
        mab_seq: String,

        #[arg(long)]
        mab_name: Option<String>,

        /// Assessment type used for tier lookups, e.g. EXAM or CW
        #[arg(long)]
        assessment_type: Option<String>,

        /// Register with extensions turned off
        #[arg(long)]
        disabled: bool,
    },

    /// Queue the backfill for a newly created mapping
    EnqueueMapping {
        #[arg(long)]
        mapping_id: DbId,
    },

    /// Record a new course enrolment for the next enrolment run
    RecordEnrolment {
        #[arg(long)]
        course_id: DbId,

        #[arg(long)]
        user_id: DbId,
    },

    /// Reverse every extension on a mapping, then delete it
    RemoveMapping {
        #[arg(long)]
        mapping_id: DbId,
    },

    /// Re-run a failed or ignored message from the ledger
    RetryMessage {
        /// Ledger row id (see `list-failed`)
        #[arg(long)]
        id: DbId,
    },

    /// Print failed ledger rows as JSON lines, newest first
    ListFailed {
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// List ignored messages instead of failed ones
        #[arg(long)]
        ignored: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing(LogFormat::from_env());

    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;

    let pool = gradepush_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    gradepush_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::debug!("Database connection pool created");

    let store: Arc<dyn ExtensionStore> = Arc::new(PgExtensionStore::new(pool.clone()));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            gradepush_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");
            run(&config, store).await?;
        }
        Commands::Scan {
            course_id,
            extension_type,
        } => {
            let scope = ExtensionScope::parse(&extension_type)?;
            let task = tasks::request_scan(store.as_ref(), ScanRequest::new(course_id, scope)?).await?;
            println!("Queued scan task {} (course {course_id}, {scope})", task.id);
        }
        Commands::RegisterMapping {
            course_id,
            activity_type,
            activity_instance_id,
            map_code,
            mab_seq,
            mab_name,
            assessment_type,
            disabled,
        } => {
            let input = RegisterMapping {
                course_id,
                activity_type,
                activity_instance_id,
                component: CreateComponentGrade {
                    map_code,
                    mab_seq,
                    mab_name,
                    assessment_type,
                },
                extension_enabled: Some(!disabled),
            };
            let (mapping, task) = tasks::register_mapping(store.as_ref(), &input).await?;
            match task {
                Some(task) => println!(
                    "Registered mapping {} and queued backfill task {}",
                    mapping.id, task.id
                ),
                None => println!("Registered mapping {} with extensions disabled", mapping.id),
            }
        }
        Commands::EnqueueMapping { mapping_id } => {
            let task = tasks::enqueue_new_mapping(store.as_ref(), mapping_id).await?;
            println!("Queued backfill task {} for mapping {mapping_id}", task.id);
        }
        Commands::RecordEnrolment { course_id, user_id } => {
            if tasks::enqueue_enrolment(store.as_ref(), course_id, user_id).await? {
                println!("Recorded enrolment of user {user_id} in course {course_id}");
            } else {
                println!("Enrolment of user {user_id} in course {course_id} is already pending");
            }
        }
        Commands::RemoveMapping { mapping_id } => {
            let engine = build_engine(&config, store)?;
            let summary = engine.applier().remove_mapping(mapping_id).await?;
            println!(
                "Removed mapping {} after reversing {} override(s)",
                summary.mapping_id, summary.reversed
            );
        }
        Commands::RetryMessage { id } => {
            let engine = build_engine(&config, store.clone())?;
            let status = processor::retry_message(store.as_ref(), &engine, id).await?;
            println!("Message {id}: {status}");
        }
        Commands::ListFailed { limit, ignored } => {
            let status = if ignored {
                MessageStatus::Ignored
            } else {
                MessageStatus::Failed
            };
            for row in store.list_messages(status, limit).await? {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_engine(
    config: &WorkerConfig,
    store: Arc<dyn ExtensionStore>,
) -> anyhow::Result<Arc<ExtensionEngine>> {
    let lms = Arc::new(LmsRestClient::new(
        config.lms_api_url()?,
        config.lms_api_token.clone(),
    )?);
    let registry = ActivityType::ALL
        .into_iter()
        .fold(ActivityRegistry::new(), |registry, activity_type| {
            registry.with(Arc::new(RestActivityStore::new(lms.clone(), activity_type)))
        });

    let resolver = MappingResolver::new(store.clone(), lms.clone());
    let applier = ExtensionApplier::new(
        store.clone(),
        lms,
        registry,
        Arc::new(SystemClock),
        config.worker_identity.clone(),
    );
    Ok(Arc::new(ExtensionEngine::new(store, resolver, applier)))
}

fn build_rescanner(
    config: &WorkerConfig,
    store: Arc<dyn ExtensionStore>,
    engine: Arc<ExtensionEngine>,
) -> anyhow::Result<Arc<Rescanner>> {
    let lms = Arc::new(LmsRestClient::new(
        config.lms_api_url()?,
        config.lms_api_token.clone(),
    )?);
    let records = Arc::new(SitsApiClient::new(
        config.sits_api_url()?,
        config.sits_api_token.clone(),
        config.sits_cache_ttl,
    )?);
    let rescan = RescanConfig {
        scan_batch_size: config.scan_batch_size,
        enrolment_batch_size: config.enrolment_batch_size,
        enrolment_max_attempts: config.enrolment_max_attempts,
        enrolment_retry_secs: config.enrolment_retry_delay.as_secs() as i64,
        api_attempts: config.sits_api_attempts,
    };
    Ok(Arc::new(Rescanner::new(store, lms, records, engine, rescan)))
}

// ---------------------------------------------------------------------------
// Long-running mode
// ---------------------------------------------------------------------------

async fn run(config: &WorkerConfig, store: Arc<dyn ExtensionStore>) -> anyhow::Result<()> {
    let engine = build_engine(config, store.clone())?;
    let rescanner = build_rescanner(config, store.clone(), engine.clone())?;

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    for (name, url) in [("raa", &config.raa_queue_url), ("ec", &config.ec_queue_url)] {
        let Some(url) = url else {
            tracing::warn!(queue = name, "Queue URL not set, consumer disabled");
            continue;
        };
        let queue = Arc::new(SqsMessageQueue::from_env(name, url.clone()).await);
        let consumer = QueueProcessor::new(queue, store.clone(), engine.clone())
            .with_limits(config.queue_batch_size, config.queue_max_batches);
        let interval = config.queue_poll_interval;
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            consumer.run(interval, cancel).await;
        }));
    }

    let runner = TaskRunner::new(store, rescanner, config.worker_identity.clone())
        .with_poll_interval(config.task_poll_interval);
    let runner_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        runner.run(runner_cancel).await;
    }));

    tracing::info!(
        worker = %config.worker_identity,
        loops = handles.len(),
        "Extension worker started",
    );

    shutdown_signal().await;
    cancel.cancel();

    for handle in handles {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
            tracing::warn!("Worker loop did not stop within the shutdown timeout");
        }
    }
    tracing::info!("Extension worker stopped");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
