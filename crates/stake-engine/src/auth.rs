//! Authorization seam
//!
//! Entry points name the permission they need; who holds it is answered by an
//! external policy store behind [`Authorizer`].

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stake_types::Pubkey;

use crate::error::StakeError;

/// Permission tags checked by privileged entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Oracle disposition, pause and configuration
    Admin,
    /// Oracle snapshots and origin chain headers
    OracleSubmitter,
    /// Exit queue allocation and funding requests
    Allocator,
    /// Value intake from the strategy layer
    Depositor,
}

/// Resolves whether a caller holds a permission
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, caller: &Pubkey, permission: Permission) -> bool;
}

/// Fail with `Unauthorized` unless `caller` holds `permission`
pub fn ensure_authorized(
    authorizer: &dyn Authorizer,
    caller: &Pubkey,
    permission: Permission,
) -> Result<(), StakeError> {
    if authorizer.is_authorized(caller, permission) {
        Ok(())
    } else {
        Err(StakeError::Unauthorized {
            caller: *caller,
            permission,
        })
    }
}

/// In-memory role table
#[derive(Default)]
pub struct RoleStore {
    roles: RwLock<HashMap<Permission, HashSet<Pubkey>>>,
}

impl RoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a permission
    pub fn grant(&self, account: Pubkey, permission: Permission) {
        self.roles.write().entry(permission).or_default().insert(account);
    }

    /// Revoke a permission. Returns false if it was not held.
    pub fn revoke(&self, account: &Pubkey, permission: Permission) -> bool {
        self.roles
            .write()
            .get_mut(&permission)
            .map(|holders| holders.remove(account))
            .unwrap_or(false)
    }

    /// Builder-style grant
    pub fn with(self, account: Pubkey, permission: Permission) -> Self {
        self.grant(account, permission);
        self
    }
}

impl Authorizer for RoleStore {
    fn is_authorized(&self, caller: &Pubkey, permission: Permission) -> bool {
        self.roles
            .read()
            .get(&permission)
            .map(|holders| holders.contains(caller))
            .unwrap_or(false)
    }
}
