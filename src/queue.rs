use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::create_timestamp;

pub const QUEUE_KEY: &str = "runbox:queue";
pub const JOB_PREFIX: &str = "runbox:job";

/// Terminal job records are kept for a day, then expire.
pub const RESULT_TTL_SECS: i64 = 86_400;

/// Redis key holding one job's record.
pub fn job_key(id: &Uuid) -> String {
    format!("{JOB_PREFIX}:{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Stalled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
            Self::Stalled => "stalled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "delayed" => Some(Self::Delayed),
            "stalled" => Some(Self::Stalled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub language: String,
    pub code: String,
}

/// One queue-resident job, as stored in its redis hash.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub payload: JobPayload,
    pub state: JobState,
    pub output: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_time: String,
    pub updated_time: String,
}

impl JobRecord {
    fn from_fields(id: Uuid, fields: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("job {id} record is missing the `{name}` field"))
        };

        let state_raw = get("state")?;
        let state = JobState::parse(&state_raw)
            .ok_or_else(|| anyhow!("job {id} has an unrecognized state `{state_raw}`"))?;
        let attempts = fields
            .get("attempts")
            .map(|raw| raw.parse())
            .transpose()
            .with_context(|| format!("job {id} has a malformed attempts counter"))?
            .unwrap_or(0);

        Ok(Self {
            id,
            payload: JobPayload {
                language: get("language")?,
                code: get("code")?,
            },
            state,
            output: fields.get("output").cloned(),
            error: fields.get("error").cloned(),
            attempts,
            created_time: get("created_time")?,
            updated_time: get("updated_time")?,
        })
    }
}

/// Durable FIFO over a redis broker.
///
/// Submissions land in a list popped by the workers; each job's payload,
/// state and terminal result live in a per-job hash so the API can look them
/// up by id at any point of the lifecycle.
#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{host}:{port}"))
            .with_context(|| format!("invalid redis address {host}:{port}"))?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("failed to connect to redis at {host}:{port}"))?;
        Ok(Self { conn })
    }

    /// Broker reachability round-trip.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            bail!("unexpected PING reply: {pong}");
        }
        Ok(())
    }

    /// Stores the job record and appends its id to the waiting list.
    /// Uses RPUSH so delivery order is FIFO.
    pub async fn submit(&self, payload: &JobPayload) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = create_timestamp();
        let fields = [
            ("language", payload.language.clone()),
            ("code", payload.code.clone()),
            ("state", JobState::Waiting.to_string()),
            ("attempts", "0".to_string()),
            ("created_time", now.clone()),
            ("updated_time", now),
        ];

        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(job_key(&id), &fields).await?;
        let _: () = conn.rpush(QUEUE_KEY, id.to_string()).await?;
        Ok(id)
    }

    /// Pops the next waiting job and marks it active, blocking for at most
    /// `block_secs`. The bounded block keeps shutdown responsive.
    pub async fn next(&self, block_secs: f64) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.blpop(QUEUE_KEY, block_secs).await?;
        let Some((_key, raw_id)) = popped else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&raw_id)
            .with_context(|| format!("queue delivered a malformed job id `{raw_id}`"))?;

        let Some(mut record) = self.fetch(&id).await? else {
            // The record can expire between submit and delivery; drop the id.
            log::warn!("job {id} was delivered but its record no longer exists");
            return Ok(None);
        };

        let key = job_key(&id);
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("state", JobState::Active.to_string()),
                    ("updated_time", create_timestamp()),
                ],
            )
            .await?;
        let attempts: u32 = conn.hincr(&key, "attempts", 1).await?;

        record.state = JobState::Active;
        record.attempts = attempts;
        Ok(Some(record))
    }

    /// Resolves a job with its captured stdout.
    pub async fn complete(&self, id: &Uuid, stdout: &str) -> Result<()> {
        self.finish(id, JobState::Completed, "output", stdout).await
    }

    /// Rejects a job with a failure reason.
    pub async fn fail(&self, id: &Uuid, reason: &str) -> Result<()> {
        self.finish(id, JobState::Failed, "error", reason).await
    }

    async fn finish(&self, id: &Uuid, state: JobState, field: &str, value: &str) -> Result<()> {
        let key = job_key(id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("state", state.to_string()),
                    (field, value.to_string()),
                    ("updated_time", create_timestamp()),
                ],
            )
            .await?;
        let _: () = conn.expire(&key, RESULT_TTL_SECS).await?;
        Ok(())
    }

    /// State/result lookup by id.
    pub async fn fetch(&self, id: &Uuid) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(JobRecord::from_fields(*id, &fields)?))
    }

    /// Removes a still-waiting job from the queue. Returns false when the
    /// job was already dispatched (or never existed).
    pub async fn cancel(&self, id: &Uuid) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(QUEUE_KEY, 1, id.to_string()).await?;
        if removed == 0 {
            return Ok(false);
        }
        let _: () = conn.del(job_key(id)).await?;
        Ok(true)
    }
}
