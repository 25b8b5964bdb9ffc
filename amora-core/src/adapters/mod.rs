//! Port implementations: infrastructure-backed and in-process.

pub mod classifier;
pub mod memory;
pub mod minio;
pub mod rabbitmq;
pub mod redis;

pub use classifier::HttpClassifier;
pub use memory::{
    FakeSigner, ManualClock, MemoryCache, MemoryRateLimiter, RecordingEventSink, RecordingNotifier,
    StaticClassifier,
};
pub use minio::MinioSigner;
pub use rabbitmq::{RabbitEventSink, RabbitNotifier};
pub use redis::{RedisCache, RedisRateLimiter};
