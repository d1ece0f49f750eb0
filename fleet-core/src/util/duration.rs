use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Duration as written in configuration files, e.g. `{ seconds = 5 }` or `{ milliseconds = 300 }`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfigDuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    milliseconds: Option<u64>,
}

impl ConfigDuration {
    pub fn to_std_duration(&self) -> Duration {
        let secs = self.minutes.unwrap_or(0) * 60 + self.seconds.unwrap_or(0);
        Duration::from_secs(secs) + Duration::from_millis(self.milliseconds.unwrap_or(0))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self { minutes: None, seconds: None, milliseconds: Some(millis) }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self { minutes: None, seconds: Some(secs), milliseconds: None }
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.to_std_duration()
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        Self::from_millis(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use crate::util::duration::ConfigDuration;

    #[derive(Deserialize)]
    struct Timeouts {
        connect: ConfigDuration,
        probe: ConfigDuration,
    }

    #[test]
    fn test_parse_durations() -> anyhow::Result<()> {
        let timeouts: Timeouts = toml::from_str(r#"
            connect = { seconds = 5 }
            probe = { minutes = 1, milliseconds = 250 }
        "#)?;
        assert_eq!(timeouts.connect.to_std_duration(), Duration::from_secs(5));
        assert_eq!(Duration::from(timeouts.probe), Duration::from_millis(60_250));
        Ok(())
    }
}
