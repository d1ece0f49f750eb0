//! Key layouts of both backends.

/// Name prefix of mailbox nodes under the etcd root.
pub const MAILBOX_PREFIX: &str = "cmd-";
pub const RESULT_SUFFIX: &str = "result";

/// etcd layout: members at `{root}/{type}#{id}`, mailboxes at `{root}/cmd-{id}`, results at
/// `{root}/cmd-{id}:result` or `{root}/cmd-{id}:{tag}`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EtcdKeys {
    root: String,
}

impl EtcdKeys {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix covering every node of the namespace, used for listing and watching.
    pub fn namespace(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn member(&self, server_type: &str, server_id: &str) -> String {
        format!("{}/{}#{}", self.root, server_type, server_id)
    }

    pub fn mailbox(&self, server_id: &str) -> String {
        format!("{}/{}{}", self.root, MAILBOX_PREFIX, server_id)
    }

    pub fn result(&self, server_id: &str, tag: Option<&str>) -> String {
        format!("{}:{}", self.mailbox(server_id), tag.unwrap_or(RESULT_SUFFIX))
    }

    /// Child name of `key` under the namespace, `None` for keys outside of it or nested deeper.
    pub fn child<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.root)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|child| !child.is_empty() && !child.contains('/'))
    }

    /// Member nodes are every child that is neither a mailbox nor a result.
    pub fn is_member(&self, key: &str) -> bool {
        self.child(key).is_some_and(|child| !child.starts_with(MAILBOX_PREFIX))
    }

    /// Mailbox node of `server_id`, excluding its result keys.
    pub fn is_mailbox_of(&self, key: &str, server_id: &str) -> bool {
        key == self.mailbox(server_id)
    }
}

/// Redis layout: membership sorted set `{prefix}{env}`, mailbox `{prefix}{env}:{id}`, results
/// at `{result-prefix}{env}:{id}` or `{result-prefix}{env}:{id}:{tag}`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RedisKeys {
    prefix: String,
    result_prefix: String,
    env: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>, result_prefix: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            result_prefix: result_prefix.into(),
            env: env.into(),
        }
    }

    pub fn members(&self) -> String {
        format!("{}{}", self.prefix, self.env)
    }

    pub fn mailbox(&self, server_id: &str) -> String {
        format!("{}{}:{}", self.prefix, self.env, server_id)
    }

    pub fn result(&self, server_id: &str, tag: Option<&str>) -> String {
        match tag {
            None => format!("{}{}:{}", self.result_prefix, self.env, server_id),
            Some(tag) => format!("{}{}:{}:{}", self.result_prefix, self.env, server_id, tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::keys::{EtcdKeys, RedisKeys};

    #[test]
    fn test_etcd_layout() {
        let keys = EtcdKeys::new("/fleet/");
        assert_eq!(keys.namespace(), "/fleet/");
        assert_eq!(keys.member("connector", "connector-1"), "/fleet/connector#connector-1");
        assert_eq!(keys.mailbox("connector-1"), "/fleet/cmd-connector-1");
        assert_eq!(keys.result("connector-1", None), "/fleet/cmd-connector-1:result");
        assert_eq!(keys.result("connector-1", Some("show")), "/fleet/cmd-connector-1:show");
        assert!(keys.is_member("/fleet/connector#connector-1"));
        assert!(!keys.is_member("/fleet/cmd-connector-1"));
        assert!(!keys.is_member("/fleet/cmd-connector-1:show"));
        assert!(!keys.is_member("/fleetx/area#area-1"));
        assert!(!keys.is_member("/fleet/a/b"));
        assert!(keys.is_mailbox_of("/fleet/cmd-connector-1", "connector-1"));
        assert!(!keys.is_mailbox_of("/fleet/cmd-connector-1:result", "connector-1"));
    }

    #[test]
    fn test_redis_layout() {
        let keys = RedisKeys::new("fleet-reg:", "fleet-res:", "dev");
        assert_eq!(keys.members(), "fleet-reg:dev");
        assert_eq!(keys.mailbox("area-1"), "fleet-reg:dev:area-1");
        assert_eq!(keys.result("area-1", None), "fleet-res:dev:area-1");
        assert_eq!(keys.result("area-1", Some("show")), "fleet-res:dev:area-1:show");
    }
}
