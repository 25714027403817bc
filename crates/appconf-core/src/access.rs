//! Data-plane actions and the caller's authorization decision
//!
//! Authentication and role evaluation happen outside the core. The transport
//! layer hands over a [`Principal`] and the set of actions it was granted;
//! operations check membership with [`Permissions::require`].

use crate::errors::{AppConfError, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    KeyValueRead,
    KeyValueWrite,
    /// Delete returns the removed value, so it implies a read of that value
    KeyValueDelete,
    SnapshotRead,
    /// Needs `KeyValueRead` as well to materialize content
    SnapshotCreate,
    /// Archive and recover
    SnapshotArchive,
    UseSasAuth,
}

/// Registered action names; values must never change
const ACTION_NAMES: [(Action, &str); 7] = [
    (
        Action::KeyValueRead,
        "Microsoft.AppConfiguration/configurationStores/keyValues/read",
    ),
    (
        Action::KeyValueWrite,
        "Microsoft.AppConfiguration/configurationStores/keyValues/write",
    ),
    (
        Action::KeyValueDelete,
        "Microsoft.AppConfiguration/configurationStores/keyValues/delete",
    ),
    (
        Action::SnapshotRead,
        "Microsoft.AppConfiguration/configurationStores/snapshots/read",
    ),
    (
        Action::SnapshotCreate,
        "Microsoft.AppConfiguration/configurationStores/snapshots/write",
    ),
    (
        Action::SnapshotArchive,
        "Microsoft.AppConfiguration/configurationStores/snapshots/archive/action",
    ),
    (
        Action::UseSasAuth,
        "Microsoft.AppConfiguration/configurationStores/useSasAuth/action",
    ),
];

impl Action {
    pub const ALL: [Action; 7] = [
        Action::KeyValueRead,
        Action::KeyValueWrite,
        Action::KeyValueDelete,
        Action::SnapshotRead,
        Action::SnapshotCreate,
        Action::SnapshotArchive,
        Action::UseSasAuth,
    ];

    pub fn name(self) -> &'static str {
        ACTION_NAMES
            .iter()
            .find(|(action, _)| *action == self)
            .map(|(_, name)| *name)
            .unwrap_or_default()
    }

    pub fn from_name(name: &str) -> Option<Action> {
        ACTION_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(action, _)| *action)
    }
}

/// Authenticated caller as resolved by the identity layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub name: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Actions a principal was granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    principal: Principal,
    granted: BTreeSet<Action>,
}

impl Permissions {
    pub fn new(principal: Principal, granted: impl IntoIterator<Item = Action>) -> Self {
        Self {
            principal,
            granted: granted.into_iter().collect(),
        }
    }

    /// Every action granted, for local tooling
    pub fn full(principal: Principal) -> Self {
        Self::new(principal, Action::ALL)
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn allows(&self, action: Action) -> bool {
        self.granted.contains(&action)
    }

    /// # Errors
    ///
    /// `AppConfError::Forbidden` when `action` was not granted.
    pub fn require(&self, action: Action) -> Result<()> {
        if self.allows(action) {
            return Ok(());
        }
        Err(AppConfError::Forbidden {
            action: action.name().to_string(),
            principal: self.principal.to_string(),
        })
    }
}
