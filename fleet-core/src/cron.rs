use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CronId {
    Number(u64),
    Name(String),
}

impl Display for CronId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CronId::Number(id) => write!(f, "{}", id),
            CronId::Name(id) => write!(f, "{}", id),
        }
    }
}

/// A scheduled job descriptor as understood by the host's cron registry.
///
/// Removal only needs `id`; `time` and `action` are required to add a job.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Cron {
    pub id: CronId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Display for Cron {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cron({}", self.id)?;
        if let Some(time) = &self.time {
            write!(f, ", {}", time)?;
        }
        if let Some(action) = &self.action {
            write!(f, ", {}", action)?;
        }
        write!(f, ")")
    }
}
