use nix::unistd::{Uid, User, getuid};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to look up uid {uid}: {source}")]
    Lookup {
        uid: u32,
        #[source]
        source: nix::Error,
    },
    #[error("no passwd entry for uid {0}")]
    Unknown(u32),
}

/// The account the SSH login runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// Resolve the passwd entry of the real uid of this process.
    pub fn current() -> Result<Self, IdentityError> {
        let uid = getuid();
        Self::from_uid(uid)
    }

    pub fn from_uid(uid: Uid) -> Result<Self, IdentityError> {
        let user = User::from_uid(uid)
            .map_err(|source| IdentityError::Lookup {
                uid: uid.as_raw(),
                source,
            })?
            .ok_or(IdentityError::Unknown(uid.as_raw()))?;
        Ok(Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        })
    }
}
