//! Ownership transfer and privilege drop.
//!
//! Both operations are all-or-nothing from the caller's point of view:
//! an `Err` means the launch must not continue as if it had succeeded.

use std::ffi::CString;
use std::io;
use std::os::unix::fs::lchown;
use std::path::{Path, PathBuf};

use nix::unistd::{initgroups, setgid, setuid, Gid, Uid, User};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("failed to look up user '{user}': {source}")]
    Lookup {
        user: String,
        #[source]
        source: nix::Error,
    },

    #[error("failed to chown {} to {user}: {source}", path.display())]
    Chown {
        path: PathBuf,
        user: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to switch to user '{user}' ({step}): {source}")]
    Switch {
        user: String,
        step: &'static str,
        #[source]
        source: nix::Error,
    },
}

/// OS identity operations used by the launcher.
pub trait Identity: Send + Sync {
    /// Gives `user` (and its primary group) ownership of `path`,
    /// recursively when `path` is a directory.
    fn transfer_ownership(&self, path: &Path, user: &str) -> Result<(), IdentityError>;

    /// Irreversibly switches the running process to `user`.
    fn switch_user(&self, user: &str) -> Result<(), IdentityError>;
}

/// [`Identity`] backed by the real passwd database and syscalls.
#[derive(Debug, Default, Clone)]
pub struct SystemIdentity;

impl SystemIdentity {
    fn lookup(user: &str) -> Result<User, IdentityError> {
        User::from_name(user)
            .map_err(|source| IdentityError::Lookup {
                user: user.to_string(),
                source,
            })?
            .ok_or_else(|| IdentityError::UnknownUser(user.to_string()))
    }
}

impl Identity for SystemIdentity {
    fn transfer_ownership(&self, path: &Path, user: &str) -> Result<(), IdentityError> {
        let account = Self::lookup(user)?;
        debug!(path = %path.display(), user, "Transferring ownership");

        chown_tree(path, account.uid, account.gid).map_err(|source| IdentityError::Chown {
            path: path.to_path_buf(),
            user: user.to_string(),
            source,
        })
    }

    fn switch_user(&self, user: &str) -> Result<(), IdentityError> {
        let account = Self::lookup(user)?;
        let switch_err = |step: &'static str| {
            let user = user.to_string();
            move |source| IdentityError::Switch { user, step, source }
        };

        // Group changes need privilege, so they go before setuid.
        setgid(account.gid).map_err(switch_err("setgid"))?;

        let name = CString::new(account.name.as_str())
            .map_err(|_| IdentityError::UnknownUser(user.to_string()))?;
        initgroups(&name, account.gid).map_err(switch_err("initgroups"))?;

        setuid(account.uid).map_err(switch_err("setuid"))?;

        info!(user, uid = %account.uid, gid = %account.gid, "Switched user");
        Ok(())
    }
}

/// Recursive chown that never follows symlinks.
fn chown_tree(path: &Path, uid: Uid, gid: Gid) -> io::Result<()> {
    lchown(path, Some(uid.as_raw()), Some(gid.as_raw()))?;

    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            chown_tree(&entry?.path(), uid, gid)?;
        }
    }
    Ok(())
}
