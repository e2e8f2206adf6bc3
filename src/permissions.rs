use serenity::model::permissions::Permissions;

use crate::error::{Error, Result};

fn permission_name(permission: Permissions) -> &'static str {
    permission.get_permission_names().first().copied().unwrap_or("Administrator")
}

/// Checks the invoking member's permissions. Owners always pass.
pub fn require(granted: Option<Permissions>, needed: Permissions, is_owner: bool) -> Result<()> {
    if is_owner {
        return Ok(());
    }
    let granted = granted.unwrap_or_else(Permissions::empty);
    if granted.administrator() || granted.contains(needed) {
        return Ok(());
    }
    Err(Error::MissingPermission(permission_name(needed - granted)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_permission_passes() {
        let granted = Permissions::MANAGE_CHANNELS | Permissions::SEND_MESSAGES;
        assert!(require(Some(granted), Permissions::MANAGE_CHANNELS, false).is_ok());
        assert!(require(Some(Permissions::ADMINISTRATOR), Permissions::MANAGE_MESSAGES, false).is_ok());
    }

    #[test]
    fn missing_permission_is_named() {
        let err = require(Some(Permissions::SEND_MESSAGES), Permissions::MANAGE_CHANNELS, false).unwrap_err();
        assert!(matches!(err, Error::MissingPermission("Manage Channels")));

        let err = require(None, Permissions::MANAGE_MESSAGES, false).unwrap_err();
        assert!(matches!(err, Error::MissingPermission("Manage Messages")));
    }

    #[test]
    fn owners_bypass() {
        assert!(require(None, Permissions::MANAGE_CHANNELS, true).is_ok());
    }
}
