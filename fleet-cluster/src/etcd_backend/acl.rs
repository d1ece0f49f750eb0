use anyhow::Context;
use etcd_client::{Client, Permission};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Role name derived from the shared credential, so every process of the fleet grants the same
/// role.
pub(super) fn role_name(username: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", username, password).as_bytes());
    let hex = digest.iter().map(|b| format!("{:02x}", b)).collect::<String>();
    format!("fleet-{}", &hex[..16])
}

/// Restricts the namespace to the credential's role: read/write on the root prefix, bound to
/// the user.
pub(super) async fn grant(client: &mut Client, username: &str, password: &str, root: &str) -> anyhow::Result<()> {
    let role = role_name(username, password);
    if let Err(error) = client.role_add(role.as_str()).await {
        debug!("role {} not added, assume it exists: {}", role, error);
    }
    client.role_grant_permission(role.as_str(), Permission::read_write(root).with_prefix())
        .await
        .with_context(|| format!("grant {} on {} failed", role, root))?;
    client.user_grant_role(username, role.as_str())
        .await
        .with_context(|| format!("bind role {} to {} failed", role, username))?;
    info!("namespace {} restricted to role {}", root, role);
    Ok(())
}
