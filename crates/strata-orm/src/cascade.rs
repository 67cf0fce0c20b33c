//! Cascade authorization.
//!
//! Checked by the differ each time an operation would propagate across a
//! relation. Permissions are per operation kind, so a relation may allow
//! updates while refusing inserts and removes.

use std::fmt;

use strata_core::RelationMetadata;
use tracing::debug;

use crate::error::{OrmError, Result};

/// What to do when a relation does not grant a needed cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeMode {
    /// Skip the operation. A refused insert drops the whole subtree behind it.
    #[default]
    Permissive,
    /// Fail with [`OrmError::CascadeNotAllowed`].
    Strict,
}

/// Kind of a propagated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A new related entity is inserted.
    Insert,
    /// A changed related entity is updated.
    Update,
    /// A related entity dropped from the graph is removed.
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
        })
    }
}

/// Applies a [`CascadeMode`] to relation permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeAuthorizer {
    mode: CascadeMode,
}

impl CascadeAuthorizer {
    /// Creates an authorizer for `mode`.
    #[must_use]
    pub const fn new(mode: CascadeMode) -> Self {
        Self { mode }
    }

    /// Returns the mode.
    #[must_use]
    pub const fn mode(&self) -> CascadeMode {
        self.mode
    }

    /// Whether `kind` may propagate across `relation` of `entity`.
    ///
    /// Returns `Ok(false)` when the permissive mode skips it.
    pub fn authorize(
        &self,
        kind: OperationKind,
        entity: &str,
        relation: &RelationMetadata,
    ) -> Result<bool> {
        let granted = match kind {
            OperationKind::Insert => relation.cascade.insert,
            OperationKind::Update => relation.cascade.update,
            OperationKind::Remove => relation.cascade.remove,
        };
        if granted {
            return Ok(true);
        }
        match self.mode {
            CascadeMode::Permissive => {
                debug!(%kind, entity = %entity, relation = %relation.property, "Cascade skipped");
                Ok(false)
            }
            CascadeMode::Strict => Err(OrmError::CascadeNotAllowed {
                kind,
                entity: entity.to_string(),
                relation: relation.property.clone(),
            }),
        }
    }
}
