use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Opaque job payload, forwarded verbatim to the worker operation.
pub type Payload = Value;

static NEXT_JOB_SEQ: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier.
///
/// Generated ids have the form `job-<seq>-<suffix>`: a monotonic counter
/// followed by eight hex characters of a random v4 UUID. Caller-supplied ids
/// are kept as-is.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        let seq = NEXT_JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("job-{seq}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Queue lane of a job. `High` jobs go ahead of every `Normal` job that is
/// still waiting, but behind `High` jobs submitted earlier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    #[default]
    Normal,
    High,
}

impl JobPriority {
    pub fn is_high(self) -> bool {
        matches!(self, JobPriority::High)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
        }
    }
}

impl From<bool> for JobPriority {
    fn from(priority_job: bool) -> Self {
        if priority_job {
            JobPriority::High
        } else {
            JobPriority::Normal
        }
    }
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction input for a [`Job`]. Every field except the action is
/// optional.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: Option<JobId>,
    pub action: String,
    pub payload: Option<Payload>,
    #[serde(default)]
    pub priority: JobPriority,
}

impl JobSpec {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: None,
            action: action.into(),
            payload: None,
            priority: JobPriority::Normal,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_priority(mut self, priority: impl Into<JobPriority>) -> Self {
        self.priority = priority.into();
        self
    }
}

/// One requested unit of work. Immutable once built; the action name is not
/// validated here, an unknown action only fails when a worker runs it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub action: String,
    pub payload: Payload,
    pub priority: JobPriority,
}

impl Job {
    pub fn new(
        action: impl Into<String>,
        payload: Payload,
        priority: impl Into<JobPriority>,
    ) -> Self {
        Self::from_spec(
            JobSpec::new(action)
                .with_payload(payload)
                .with_priority(priority),
        )
    }

    pub fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: spec.id.unwrap_or_else(JobId::generate),
            action: spec.action,
            payload: spec.payload.unwrap_or_else(empty_payload),
            priority: spec.priority,
        }
    }

    pub fn is_priority(&self) -> bool {
        self.priority.is_high()
    }
}

/// The default payload: an empty JSON object.
pub fn empty_payload() -> Payload {
    Value::Object(serde_json::Map::new())
}
