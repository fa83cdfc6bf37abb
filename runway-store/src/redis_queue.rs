use async_trait::async_trait;
use chrono::Utc;
use runway_notify::job::{Channel, JobKey, NotificationJob};
use runway_notify::queue::{EnqueueOutcome, JobQueue, QueueError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::redis_repo::RedisClient;

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(250);
const PROMOTE_BATCH: usize = 100;
const REQUEUE_BATCH: usize = 100;

/// Sets the seen marker, stores the body and pushes the key in one step,
/// so an accepted key always has a runnable job behind it.
const ENQUEUE: &str = r#"
if not redis.call("SET", KEYS[1], 1, "NX", "EX", ARGV[1]) then
    return 0
end
redis.call("HSET", KEYS[2], ARGV[2], ARGV[3])
redis.call("LPUSH", KEYS[3], ARGV[2])
return 1
"#;

/// Promotes due delayed jobs, pops the oldest ready key and leases it until
/// ARGV[3]. Returns `{key, body}`, `{key}` for an orphaned key, or nil.
const CLAIM: &str = r#"
local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
for _, key in ipairs(due) do
    redis.call("ZREM", KEYS[1], key)
    redis.call("LPUSH", KEYS[2], key)
end
local key = redis.call("RPOP", KEYS[2])
if not key then
    return nil
end
local body = redis.call("HGET", KEYS[4], key)
if not body then
    return {key}
end
redis.call("ZADD", KEYS[3], ARGV[3], key)
return {key, body}
"#;

/// Moves keys whose lease ended before ARGV[1] back to the ready list.
const REQUEUE_EXPIRED: &str = r#"
local expired = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
for _, key in ipairs(expired) do
    redis.call("ZREM", KEYS[1], key)
    redis.call("RPUSH", KEYS[2], key)
end
return #expired
"#;

fn backend(err: redis::RedisError) -> QueueError {
    QueueError::Backend(err.to_string())
}

/// Key layout for one channel's queue.
#[derive(Debug, Clone)]
struct QueueKeys {
    ready: String,
    delayed: String,
    /// Claimed keys scored by lease expiry in epoch millis.
    leases: String,
    jobs: String,
    prefix: String,
}

impl QueueKeys {
    fn new(channel: Channel) -> Self {
        Self::with_prefix(format!("runway:queue:{}", channel.as_str()))
    }

    fn with_prefix(prefix: String) -> Self {
        Self {
            ready: format!("{}:ready", prefix),
            delayed: format!("{}:delayed", prefix),
            leases: format!("{}:leases", prefix),
            jobs: format!("{}:jobs", prefix),
            prefix,
        }
    }

    fn seen(&self, key: &JobKey) -> String {
        format!("{}:seen:{}", self.prefix, key)
    }

    fn done(&self, key: &JobKey) -> String {
        format!("{}:done:{}", self.prefix, key)
    }
}

/// Durable per-channel job queue on Redis, shared by every instance.
///
/// Job bodies live in a hash keyed by job key; the ready list, delayed set
/// and lease set hold keys only. Claims run as one script, so a job is held
/// by exactly one worker until it settles or its lease expires.
pub struct RedisJobQueue {
    redis: RedisClient,
    keys: QueueKeys,
    idempotency_ttl_secs: u64,
    lease: Duration,
}

impl RedisJobQueue {
    pub fn new(redis: RedisClient, channel: Channel, idempotency_ttl_secs: u64, lease_secs: u64) -> Self {
        Self {
            redis,
            keys: QueueKeys::new(channel),
            idempotency_ttl_secs,
            lease: Duration::from_secs(lease_secs),
        }
    }

    fn encode(job: &NotificationJob) -> Result<String, QueueError> {
        serde_json::to_string(job).map_err(|e| QueueError::Encoding(e.to_string()))
    }

    async fn try_claim(&self) -> Result<Option<NotificationJob>, QueueError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let now = Utc::now().timestamp_millis();
        let lease_until = now + self.lease.as_millis() as i64;

        let claimed: Option<Vec<String>> = redis::Script::new(CLAIM)
            .key(&self.keys.delayed)
            .key(&self.keys.ready)
            .key(&self.keys.leases)
            .key(&self.keys.jobs)
            .arg(now)
            .arg(PROMOTE_BATCH)
            .arg(lease_until)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        match claimed.as_deref() {
            None | Some([]) => Ok(None),
            Some([key]) => {
                warn!("Job {} has no body, dropping it", key);
                Ok(None)
            }
            Some([key, body, ..]) => {
                debug!("Claimed job {} on {}", key, self.keys.prefix);
                serde_json::from_str(body)
                    .map(Some)
                    .map_err(|e| QueueError::Encoding(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: NotificationJob) -> Result<EnqueueOutcome, QueueError> {
        let body = Self::encode(&job)?;
        let mut conn = self.redis.connection().await.map_err(backend)?;

        let accepted: i64 = redis::Script::new(ENQUEUE)
            .key(self.keys.seen(&job.key))
            .key(&self.keys.jobs)
            .key(&self.keys.ready)
            .arg(self.idempotency_ttl_secs)
            .arg(job.key.as_str())
            .arg(body)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(if accepted == 1 { EnqueueOutcome::Enqueued } else { EnqueueOutcome::Duplicate })
    }

    async fn claim(&self, wait: Duration) -> Result<Option<NotificationJob>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(job) = self.try_claim().await? {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(CLAIM_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn is_delivered(&self, key: &JobKey) -> Result<bool, QueueError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        redis::cmd("EXISTS")
            .arg(self.keys.done(key))
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    async fn complete(&self, job: &NotificationJob) -> Result<(), QueueError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        redis::pipe()
            .atomic()
            .cmd("SET").arg(self.keys.done(&job.key)).arg(1).arg("EX").arg(self.idempotency_ttl_secs).ignore()
            .cmd("ZREM").arg(&self.keys.leases).arg(job.key.as_str()).ignore()
            .cmd("HDEL").arg(&self.keys.jobs).arg(job.key.as_str()).ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn schedule_retry(&self, job: &NotificationJob, delay: Duration) -> Result<(), QueueError> {
        let body = Self::encode(job)?;
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut conn = self.redis.connection().await.map_err(backend)?;
        redis::pipe()
            .atomic()
            .cmd("HSET").arg(&self.keys.jobs).arg(job.key.as_str()).arg(body).ignore()
            .cmd("ZREM").arg(&self.keys.leases).arg(job.key.as_str()).ignore()
            .cmd("ZADD").arg(&self.keys.delayed).arg(due).arg(job.key.as_str()).ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn discard(&self, job: &NotificationJob) -> Result<(), QueueError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        redis::pipe()
            .atomic()
            .cmd("ZREM").arg(&self.keys.leases).arg(job.key.as_str()).ignore()
            .cmd("HDEL").arg(&self.keys.jobs).arg(job.key.as_str()).ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let moved: i64 = redis::Script::new(REQUEUE_EXPIRED)
            .key(&self.keys.leases)
            .key(&self.keys.ready)
            .arg(Utc::now().timestamp_millis())
            .arg(REQUEUE_BATCH)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(moved.max(0) as usize)
    }
}
