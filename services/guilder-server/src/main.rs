//! Guilder server
//!
//! One binary running the whole ingestion pipeline:
//!
//! ```text
//! refresh driver -> provider streams -> bus -> consumers -> aggregates
//!                                                     \-> event store -> event bus
//! ```
//!
//! plus the OAuth connect surface and a readiness probe. SIGINT cancels
//! the global token: the refresh driver finishes its in-flight sync
//! tasks and closes the document channels, the consumers drain, and the
//! HTTP server gets five seconds to shut down gracefully.

mod http;

use anyhow::Context;
use clap::Parser;
use guilder_accounts::{AccountDocumentsConsumer, InMemoryMonetaryAccountIdResolver, MonetaryAccountAggregate};
use guilder_bunq::{
    BunqOAuth, HttpBunqApiFactory, InMemoryCredentialsStore, InMemoryRefreshTimestampStore,
    InMemoryUsersStore, OAuthConfig, RateLimiter, RefreshDriver, SledCredentialsStore,
    SledRefreshTimestampStore,
};
use guilder_bus::Bus;
use guilder_eventsourcing::{
    spawn_event_logger, AggregateStore, CommandScheduler, EventBus, InMemoryEventStore,
    InMemoryScheduledCommandStore, SledEventStore, SledScheduledCommandStore,
};
use guilder_recurring::{RecurringDocumentsConsumer, RecurringTransactionAggregate};
use guilder_types::UserId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Guilder - event-sourced personal finance backend
#[derive(Parser, Debug)]
#[command(name = "guilder-server", about = "Ingests bunq bank data into event-sourced aggregates", version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "GUILDER_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "9000", env = "GUILDER_PORT")]
    port: u16,

    /// Data directory for the durable stores; in-memory when omitted
    #[arg(long, env = "GUILDER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Seconds between refresh sweeps over all users
    #[arg(long, default_value = "21600", env = "GUILDER_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Internal user id credentials are connected to; generated when omitted
    #[arg(long, env = "GUILDER_USER_ID")]
    user_id: Option<uuid::Uuid>,

    /// bunq OAuth client id
    #[arg(long, default_value = "", env = "BUNQ_CLIENT_ID")]
    bunq_client_id: String,

    /// bunq OAuth client secret
    #[arg(long, default_value = "", env = "BUNQ_CLIENT_SECRET")]
    bunq_client_secret: String,

    /// Redirect URL registered with bunq
    #[arg(
        long,
        default_value = "http://localhost:9000/bunq/authorize",
        env = "BUNQ_REDIRECT_URL"
    )]
    bunq_redirect_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                token.cancel();
            }
        }
    });

    // durable stores, or in-memory for a throwaway run
    let db = match &args.data_dir {
        Some(data_dir) => Some(sled::open(data_dir).context("could not open data directory")?),
        None => None,
    };
    let (event_store, scheduled_store, credentials, timestamps): (
        Arc<dyn guilder_eventsourcing::EventStore>,
        Arc<dyn guilder_eventsourcing::ScheduledCommandStore>,
        Arc<dyn guilder_bunq::CredentialsStore>,
        Arc<dyn guilder_bunq::RefreshTimestampStore>,
    ) = match &db {
        Some(db) => (
            Arc::new(SledEventStore::open(db).context("event store")?),
            Arc::new(SledScheduledCommandStore::open(db).context("scheduled-command store")?),
            Arc::new(SledCredentialsStore::open(db).context("credentials store")?),
            Arc::new(SledRefreshTimestampStore::open(db).context("refresh-timestamp store")?),
        ),
        None => {
            warn!("no data directory configured, state will not survive a restart");
            (
                Arc::new(InMemoryEventStore::new()),
                Arc::new(InMemoryScheduledCommandStore::new()),
                Arc::new(InMemoryCredentialsStore::new()),
                Arc::new(InMemoryRefreshTimestampStore::new()),
            )
        }
    };

    let event_bus = EventBus::default();
    spawn_event_logger(&event_bus, token.clone());

    let account_store = Arc::new(AggregateStore::<MonetaryAccountAggregate>::new(
        event_store.clone(),
        event_bus.clone(),
        scheduled_store.clone(),
    ));
    let recurring_store = Arc::new(AggregateStore::<RecurringTransactionAggregate>::new(
        event_store,
        event_bus,
        scheduled_store.clone(),
    ));

    let scheduler = CommandScheduler::new(scheduled_store)
        .register(account_store.clone())
        .register(recurring_store.clone());
    tokio::spawn(scheduler.run(token.clone()));

    // the bus: write half to the refresh driver, read half to consumers
    let (senders, receivers) = Bus::bounded();

    let account_resolver = Arc::new(InMemoryMonetaryAccountIdResolver::new());
    let account_consumer = tokio::spawn(
        AccountDocumentsConsumer::new(
            receivers.accounts,
            receivers.transactions,
            account_store,
            account_resolver,
        )
        .run(),
    );
    let recurring_consumer = tokio::spawn(
        RecurringDocumentsConsumer::new(
            receivers.schedules,
            receivers.direct_debits,
            recurring_store,
        )
        .run(),
    );

    let user_id = match args.user_id {
        Some(user_id) => UserId::from_uuid(user_id),
        None => {
            let user_id = UserId::new();
            info!(%user_id, "no user id configured, generated one for this run");
            user_id
        }
    };
    let users = Arc::new(InMemoryUsersStore::with_users(vec![user_id]));

    let limiter = Arc::new(RateLimiter::new(token.clone()));
    let driver = RefreshDriver::new(
        users,
        credentials.clone(),
        timestamps,
        Arc::new(HttpBunqApiFactory::new(limiter)),
        senders,
        token.clone(),
    )
    .with_sweep_interval(Duration::from_secs(args.sweep_interval_secs));
    let driver_handle = tokio::spawn(driver.run());

    let oauth = Arc::new(BunqOAuth::new(
        OAuthConfig::production(
            args.bunq_client_id,
            args.bunq_client_secret,
            args.bunq_redirect_url,
            user_id,
        ),
        credentials,
    ));

    let app = http::health_router()
        .merge(http::graphql_router())
        .merge(guilder_bunq::oauth::router(oauth));

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("unable to listen on {}:{}", args.host, args.port))?;
    info!(host = %args.host, port = args.port, "server started");

    let serve = axum::serve(listener, app).with_graceful_shutdown(token.clone().cancelled_owned());

    // the shutdown grace period is bounded: five seconds after the
    // token fires the process gives up and exits non-zero
    let shutdown_deadline = {
        let token = token.clone();
        async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    };

    tokio::select! {
        result = serve => result.context("http server failed")?,
        _ = shutdown_deadline => anyhow::bail!("graceful shutdown exceeded 5s"),
    }
    info!("server stopped");

    // let the pipeline drain: the driver closed the channels when it
    // stopped, the consumers finish whatever is buffered
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = driver_handle.await;
        let _ = account_consumer.await;
        let _ = recurring_consumer.await;
    })
    .await;
    if drained.is_err() {
        warn!("pipeline did not drain within 5s");
    }

    info!("server exited properly");
    Ok(())
}
