//! Dropping privileges after the sockets are open

use nix::unistd::{setgid, setuid, Gid, Group, Uid, User};
use tracing::{info, warn};

use dhcp6d_core::{Error, Result};

/// Switch to the configured user and group.
///
/// Port 547 needs privileges, so the master opens all sockets first and
/// calls this before any worker starts. When the process wasn't started
/// with enough rights the drop is skipped with a warning, which keeps
/// test setups against virtual interfaces workable.
pub fn drop_privileges(user: Option<&str>, group: Option<&str>) -> Result<()> {
    if user.is_none() && group.is_none() {
        return Ok(());
    }

    if !Uid::effective().is_root() {
        warn!("not running as root, cannot drop privileges; continuing as-is");
        return Ok(());
    }

    // Group first: after setuid we wouldn't be allowed to anymore
    if let Some(name) = group {
        let group = Group::from_name(name)
            .map_err(|e| Error::Privilege(format!("group '{}': {}", name, e)))?
            .ok_or_else(|| Error::Privilege(format!("group '{}' not found", name)))?;
        setgid(Gid::from_raw(group.gid.as_raw()))
            .map_err(|e| Error::Privilege(format!("setgid {}: {}", name, e)))?;
        info!(group = name, "dropped group privileges");
    }

    if let Some(name) = user {
        let user = User::from_name(name)
            .map_err(|e| Error::Privilege(format!("user '{}': {}", name, e)))?
            .ok_or_else(|| Error::Privilege(format!("user '{}' not found", name)))?;
        setuid(Uid::from_raw(user.uid.as_raw()))
            .map_err(|e| Error::Privilege(format!("setuid {}: {}", name, e)))?;
        info!(user = name, "dropped user privileges");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_configured_is_a_noop() {
        assert!(drop_privileges(None, None).is_ok());
    }

    #[test]
    fn test_unprivileged_drop_warns_and_continues() {
        if Uid::effective().is_root() {
            // Only meaningful when running unprivileged
            return;
        }
        assert!(drop_privileges(Some("nobody"), None).is_ok());
    }
}
