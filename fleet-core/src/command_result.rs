use std::fmt::{Display, Formatter};

/// Outcome of one administrative command, written back beside the mailbox it came from.
///
/// `tag` selects a separate result key, used by diagnostic snapshots so they do not
/// overwrite the last ordinary result.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandResult {
    pub payload: String,
    pub tag: Option<String>,
}

impl CommandResult {
    pub fn new(payload: impl Into<String>) -> Self {
        Self { payload: payload.into(), tag: None }
    }

    pub fn tagged(payload: impl Into<String>, tag: impl Into<String>) -> Self {
        Self { payload: payload.into(), tag: Some(tag.into()) }
    }
}

impl Display for CommandResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            None => write!(f, "CommandResult({})", self.payload),
            Some(tag) => write!(f, "CommandResult[{}]({})", tag, self.payload),
        }
    }
}
