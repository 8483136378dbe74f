pub mod mongo;
pub mod redis;

pub use mongo::MongoClient;
pub use redis::{create_redis_client, Cache, CacheKey, CacheTag, CacheWriterHandle, NAMESPACE};
