use actix_middleware::{CorrelationIdMiddleware, JwtAuthMiddleware, JwtValidator, Logging};
use actix_web::{web, App, HttpServer};
use chat_core::{
    config, db, error, logging, metrics,
    repository::{
        ConversationRepository, MemoryConversationRepository, MemoryMessageRepository,
        MessageRepository, PgConversationRepository, PgMessageRepository,
    },
    routes,
    services::{
        HttpUserDirectory, InMemoryUserDirectory, KafkaNotifier, LogNotifier, Notifier,
        UserDirectory,
    },
    state::AppState,
};
use std::sync::Arc;

type Stores = (Arc<dyn ConversationRepository>, Arc<dyn MessageRepository>);

async fn build_stores(cfg: &config::Config) -> Result<Stores, error::AppError> {
    match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, cfg.database_max_connections)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Ok((
                Arc::new(PgConversationRepository::new(pool.clone())),
                Arc::new(PgMessageRepository::new(pool)),
            ))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; conversations and messages are kept in memory");
            Ok((
                Arc::new(MemoryConversationRepository::new()),
                Arc::new(MemoryMessageRepository::new()),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let cfg = Arc::new(config::Config::from_env()?);
    logging::init_tracing(cfg.log_json);

    let (conversations, messages) = build_stores(&cfg).await?;

    let users: Arc<dyn UserDirectory> = match cfg.user_directory_url.as_deref() {
        Some(url) => Arc::new(HttpUserDirectory::new(url, cfg.deadlines.lookup)?),
        None => {
            tracing::warn!("USER_DIRECTORY_URL not set; every user id is accepted");
            Arc::new(InMemoryUserDirectory::open())
        }
    };

    let notifier: Arc<dyn Notifier> = match &cfg.kafka {
        Some(kafka) => Arc::new(
            KafkaNotifier::new(&kafka.brokers, &kafka.notification_topic)
                .map_err(|e| error::AppError::StartServer(format!("kafka: {e}")))?,
        ),
        None => Arc::new(LogNotifier),
    };

    let (state, dispatcher) = AppState::build(cfg.clone(), conversations, messages, users, notifier);
    let validator = Arc::new(JwtValidator::hs256(cfg.jwt_secret.as_bytes()));

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting chat-core");

    let rest_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logging)
            .wrap(CorrelationIdMiddleware)
            .app_data(web::Data::new(rest_state.clone()))
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::metrics_handler))
            .service(
                web::scope("/api/v1")
                    .wrap(JwtAuthMiddleware::new(validator.clone()))
                    .configure(routes::configure),
            )
            .service(
                web::scope("/ws")
                    .wrap(JwtAuthMiddleware::new(validator.clone()))
                    .configure(routes::configure_ws),
            )
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")));

    tracing::info!("server stopped; draining fan-out queues");
    state.shutdown(dispatcher).await;
    result
}
