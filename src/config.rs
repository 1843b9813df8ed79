use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Deadline classes for storage calls.
#[derive(Debug, Clone, Copy)]
pub struct StorageDeadlines {
    /// Point reads (single conversation or message)
    pub lookup: Duration,
    /// Mutations and page reads
    pub write: Duration,
    /// Search, stats and bulk receipt writes
    pub scan: Duration,
}

impl Default for StorageDeadlines {
    fn default() -> Self {
        Self {
            lookup: Duration::from_secs(5),
            write: Duration::from_secs(10),
            scan: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MessagingLimits {
    pub max_content_length: usize,
    pub max_title_length: usize,
    pub max_description_length: usize,
    pub create_max_participants: usize,
    pub participant_batch_limit: usize,
    pub group_max_participants: usize,
}

impl Default for MessagingLimits {
    fn default() -> Self {
        Self {
            max_content_length: 5000,
            max_title_length: 100,
            max_description_length: 500,
            create_max_participants: 50,
            participant_batch_limit: 20,
            group_max_participants: 500,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub connection_buffer: usize,
    pub max_connections_per_user: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connection_buffer: 256,
            max_connections_per_user: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    pub workers: usize,
    pub notify_workers: usize,
    pub queue_capacity: usize,
    pub notify_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            notify_workers: 2,
            queue_capacity: 1024,
            notify_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub notification_topic: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub database_max_connections: usize,
    pub deadlines: StorageDeadlines,
    pub limits: MessagingLimits,
    pub hub: HubConfig,
    pub fanout: FanoutConfig,
    pub kafka: Option<KafkaConfig>,
    pub user_directory_url: Option<String>,
    pub log_json: bool,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn millis_or(key: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_or(key, default.as_millis() as u64))
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let jwt_secret = non_empty("JWT_SECRET")
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let default_deadlines = StorageDeadlines::default();
        let deadlines = StorageDeadlines {
            lookup: millis_or("STORAGE_LOOKUP_TIMEOUT_MS", default_deadlines.lookup),
            write: millis_or("STORAGE_WRITE_TIMEOUT_MS", default_deadlines.write),
            scan: millis_or("STORAGE_SCAN_TIMEOUT_MS", default_deadlines.scan),
        };

        let default_limits = MessagingLimits::default();
        let limits = MessagingLimits {
            max_content_length: parse_or("MESSAGE_MAX_LENGTH", default_limits.max_content_length),
            create_max_participants: parse_or(
                "CONVERSATION_CREATE_MAX_PARTICIPANTS",
                default_limits.create_max_participants,
            ),
            participant_batch_limit: parse_or(
                "PARTICIPANT_BATCH_LIMIT",
                default_limits.participant_batch_limit,
            ),
            group_max_participants: parse_or(
                "GROUP_MAX_PARTICIPANTS",
                default_limits.group_max_participants,
            ),
            ..default_limits
        };

        let default_hub = HubConfig::default();
        let hub = HubConfig {
            connection_buffer: parse_or("HUB_CONNECTION_BUFFER", default_hub.connection_buffer)
                .max(1),
            max_connections_per_user: parse_or(
                "HUB_MAX_CONNECTIONS_PER_USER",
                default_hub.max_connections_per_user,
            )
            .max(1),
        };

        let default_fanout = FanoutConfig::default();
        let fanout = FanoutConfig {
            workers: parse_or("FANOUT_WORKERS", default_fanout.workers).max(1),
            notify_workers: parse_or("NOTIFY_WORKERS", default_fanout.notify_workers).max(1),
            queue_capacity: parse_or("FANOUT_QUEUE_CAPACITY", default_fanout.queue_capacity)
                .max(1),
            ..default_fanout
        };

        let kafka = non_empty("KAFKA_BROKERS").map(|brokers| KafkaConfig {
            brokers,
            notification_topic: non_empty("KAFKA_NOTIFICATION_TOPIC")
                .unwrap_or_else(|| "notifications".to_string()),
        });

        Ok(Self {
            port: parse_or("PORT", 8085),
            jwt_secret,
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 16usize).max(1),
            deadlines,
            limits,
            hub,
            fanout,
            kafka,
            user_directory_url: non_empty("USER_DIRECTORY_URL"),
            log_json: non_empty("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }
}
