use prometheus::Registry;
use runway_api::{app, state::{AppState, AuthConfig, RateLimitConfig}, worker};
use runway_booking::{AudienceResolver, BookingManager, FlightService, StatusFanout};
use runway_notify::processor::{EmailProcessor, PushProcessor};
use runway_notify::sender::{EmailSender, HttpEmailSender, LogSender, OneSignalPushSender, PushSender};
use runway_notify::{Channel, DispatchConfig, DispatchMetrics, Dispatcher, JobQueue, RetryPolicy, StatusHub};
use runway_store::app_config::{ChannelConfig, Config};
use runway_store::{DbClient, EventProducer, KafkaStatusPublisher, PgLedger, RedisClient, RedisJobQueue};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

fn dispatch_config(cfg: &ChannelConfig) -> DispatchConfig {
    DispatchConfig {
        concurrency: cfg.concurrency,
        retry: RetryPolicy::new(cfg.max_attempts, cfg.backoff_initial()),
        ..DispatchConfig::default()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "runway_api=debug,runway_notify=info,runway_booking=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Runway API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database).await.expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");
    let ledger = Arc::new(PgLedger::new(db.pool.clone(), config.database.transaction_timeout_ms));

    // Redis
    let redis = RedisClient::new(&config.redis.url).expect("Invalid Redis URL");
    let (ttl, lease) = (config.notifications.idempotency_ttl_secs, config.notifications.lease_secs);
    let email_queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis.clone(), Channel::Email, ttl, lease));
    let push_queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis.clone(), Channel::Push, ttl, lease));

    // Kafka
    let producer = EventProducer::new(&config.kafka.brokers).expect("Failed to create Kafka producer");
    let publisher = Arc::new(KafkaStatusPublisher::new(producer, config.kafka.status_topic.clone()));

    // Notification workers
    let registry = Registry::new();
    let metrics = DispatchMetrics::new(&registry).expect("Failed to register metrics");

    let email_sender: Arc<dyn EmailSender> = if config.email.api_key.is_empty() {
        tracing::warn!("No email provider key configured, emails will only be logged");
        Arc::new(LogSender)
    } else {
        Arc::new(
            HttpEmailSender::new(
                config.email.endpoint.clone(),
                config.email.api_key.clone(),
                config.email.from.clone(),
            )
            .expect("Failed to build email client"),
        )
    };
    let push_sender: Arc<dyn PushSender> = if config.push.app_id.is_empty() {
        tracing::warn!("No push app id configured, push notifications will only be logged");
        Arc::new(LogSender)
    } else {
        Arc::new(
            OneSignalPushSender::new(
                config.push.endpoint.clone(),
                config.push.app_id.clone(),
                config.push.api_key.clone(),
            )
            .expect("Failed to build push client"),
        )
    };

    let dispatchers = [
        Arc::new(Dispatcher::new(
            Channel::Email,
            email_queue.clone(),
            Arc::new(EmailProcessor::new(email_sender)),
            dispatch_config(&config.notifications.email),
            metrics.clone(),
        )),
        Arc::new(Dispatcher::new(
            Channel::Push,
            push_queue.clone(),
            Arc::new(PushProcessor::new(push_sender)),
            dispatch_config(&config.notifications.push),
            metrics,
        )),
    ];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();
    for dispatcher in dispatchers {
        workers.extend(dispatcher.start(shutdown_rx.clone()).await);
    }

    // Realtime relay
    let status_hub = StatusHub::default();
    let relay_group = format!("{}-{}", config.kafka.group_id, Uuid::new_v4());
    let relay = worker::start_status_relay(
        config.kafka.brokers.clone(),
        relay_group,
        config.kafka.status_topic.clone(),
        status_hub.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = relay.await {
            tracing::error!("Status relay stopped: {:#}", e);
        }
    });

    let fanout = Arc::new(StatusFanout::new(
        AudienceResolver::new(ledger.clone()),
        email_queue,
        push_queue,
        publisher,
    ));

    let app_state = AppState {
        bookings: Arc::new(BookingManager::new(ledger.clone())),
        flights: Arc::new(FlightService::new(ledger.clone(), fanout)),
        devices: ledger,
        status_hub,
        registry,
        auth: AuthConfig { secret: config.auth.jwt_secret.clone() },
        rate_limit: Some(RateLimitConfig {
            redis: Arc::new(redis),
            requests: config.rate_limit.requests,
            window_seconds: config.rate_limit.window_seconds,
        }),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    let _ = shutdown_tx.send(true);
    for handle in workers {
        let _ = handle.await;
    }
    tracing::info!("Workers stopped");
}
