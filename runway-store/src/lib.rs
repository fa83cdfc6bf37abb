pub mod app_config;
pub mod database;
pub mod ledger;
pub mod redis_repo;
pub mod redis_queue;
pub mod events;

pub use database::DbClient;
pub use ledger::PgLedger;
pub use redis_repo::RedisClient;
pub use redis_queue::RedisJobQueue;
pub use events::{EventProducer, KafkaStatusPublisher};
