//! Event envelopes and routing keys shared by all task-tracker services
//!
//! Wire format is JSON with camelCase keys, matching what the task, group and
//! class services already publish. Ids arrive either as numbers or numeric
//! strings depending on the producer, so id fields are parsed leniently.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Exchange and routing key names
pub mod routing {
    /// Exchange carrying task lifecycle and status-mirror events
    pub const PROGRESS_EXCHANGE: &str = "progress.exchange";
    /// Exchange carrying notification-class events
    pub const NOTIFICATION_EXCHANGE: &str = "notification_exchange";
    /// Default queue for the log side-channel
    pub const LOG_QUEUE: &str = "logs_queue";

    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_UPDATED: &str = "task.updated";
    pub const TASK_DELETED: &str = "task.deleted";
    pub const GROUP_TASK_CREATED: &str = "group.task.created";
    pub const GROUP_TASK_UPDATED: &str = "group.task.updated";
    pub const PROGRESS_UPDATED: &str = "progress.updated";
    pub const PROGRESS_REVIEWED: &str = "progress.reviewed";

    /// Keys that seed progress records
    pub const TASK_CREATION_KEYS: &[&str] = &[TASK_CREATED, GROUP_TASK_CREATED];

    /// Keys carrying normalized status changes
    pub const STATUS_KEYS: &[&str] = &[TASK_UPDATED, GROUP_TASK_UPDATED];

    /// Every notification-class key the fan-out consumer binds at startup
    pub const NOTIFICATION_CATALOG: &[&str] = &[
        "user.update",
        "class.created",
        "class.student.added",
        "class.student.removed",
        "class.updated",
        "class.deleted",
        TASK_CREATED,
        TASK_UPDATED,
        TASK_DELETED,
        "group.created",
        "group.member_added",
        "group.task_created",
        "group.updated",
        "group.task_updated",
        "group.task_deleted",
        "group.deleted",
        PROGRESS_UPDATED,
        PROGRESS_REVIEWED,
    ];
}

/// Individual or group assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Individual,
    Group,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Individual => "Individual",
            TaskType::Group => "Group",
        }
    }

    /// Routing key for the outward status-changed event
    pub fn status_routing_key(&self) -> &'static str {
        match self {
            TaskType::Individual => routing::TASK_UPDATED,
            TaskType::Group => routing::GROUP_TASK_UPDATED,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Individual" => Ok(TaskType::Individual),
            "Group" => Ok(TaskType::Group),
            other => Err(Error::InvalidInput(format!("Unknown task type: {}", other))),
        }
    }
}

/// Progress record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressStatus {
    Pending,
    #[serde(rename = "In-Progress")]
    InProgress,
    Done,
    Revisi,
    Terlambat,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "Pending",
            ProgressStatus::InProgress => "In-Progress",
            ProgressStatus::Done => "Done",
            ProgressStatus::Revisi => "Revisi",
            ProgressStatus::Terlambat => "Terlambat",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ProgressStatus::Done)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(ProgressStatus::Pending),
            "In-Progress" => Ok(ProgressStatus::InProgress),
            "Done" => Ok(ProgressStatus::Done),
            "Revisi" => Ok(ProgressStatus::Revisi),
            "Terlambat" => Ok(ProgressStatus::Terlambat),
            other => Err(Error::InvalidInput(format!("Unknown progress status: {}", other))),
        }
    }
}

/// Notification-class envelope: `{service, type, message, userId?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub service: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<i64>,
}

impl NotificationEnvelope {
    pub fn new(service: &str, kind: &str, message: impl Into<String>, user_id: Option<i64>) -> Self {
        Self {
            service: service.to_string(),
            kind: kind.to_string(),
            message: message.into(),
            user_id,
        }
    }
}

/// Task-creation event published by the task and group services
///
/// Every field is optional at the wire level; presence of `taskId`, `userId`
/// and `taskType` is checked by the ingestion consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreatedEvent {
    #[serde(default, deserialize_with = "lenient_id")]
    pub task_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub created_by: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub assigned_to: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub dosen_name: Option<String>,
}

/// Normalized status-changed event emitted after every progress mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangedEvent {
    #[serde(deserialize_with = "required_id")]
    pub task_id: i64,
    pub status: ProgressStatus,
    pub progress: i64,
    #[serde(deserialize_with = "required_id")]
    pub user_id: i64,
    pub task_type: TaskType,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawId {
    fn into_id(self) -> Option<i64> {
        match self {
            RawId::Int(v) => Some(v),
            RawId::Float(v) if v.fract() == 0.0 => Some(v as i64),
            RawId::Float(_) => None,
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Accept `12`, `12.0`, `"12"`; map null/unparseable text to `None`
pub fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(raw.and_then(RawId::into_id))
}

fn required_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_id(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected a numeric id"))
}
