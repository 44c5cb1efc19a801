//! Request context and edit permissions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stacks_core::{
    Actor, LibraryId, LibraryType, PrimaryDataRow, RecordType, StacksError, StacksResult,
    ValidationError,
};
use tracing::debug;

use crate::backend::StorageBackend;

/// Link modes of attachments whose file is stored by the server.
pub const IMPORTED_LINK_MODES: [&str; 2] = ["imported_file", "imported_url"];

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Per-request state passed explicitly to every mutating call.
///
/// Without an actor the request runs with system privileges.
#[derive(Debug, Default)]
pub struct RequestContext {
    actor: Option<Actor>,
    open_units: AtomicUsize,
}

impl RequestContext {
    /// A context with no acting user; every edit is allowed.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_actor(actor: Actor) -> Self {
        Self {
            actor: Some(actor),
            open_units: AtomicUsize::new(0),
        }
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// Whether a unit of work is currently open for this request.
    pub fn has_open_transaction(&self) -> bool {
        self.open_units.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn enter_unit(&self) {
        self.open_units.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn exit_unit(&self) {
        self.open_units.fetch_sub(1, Ordering::SeqCst);
    }

    /// Fail with `InvalidState` if a unit of work is already open.
    pub(crate) fn ensure_idle(&self, operation: &str) -> StacksResult<()> {
        if self.has_open_transaction() {
            return Err(StacksError::invalid_state(format!(
                "{} cannot run inside an open transaction",
                operation
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ACCESS GUARD
// ============================================================================

/// What an edit touches, as far as permissions are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTarget {
    pub library_id: LibraryId,
    pub record_type: RecordType,
    /// Attachment whose file lives in server storage.
    pub is_imported_file: bool,
}

impl EditTarget {
    pub fn new(library_id: LibraryId, record_type: RecordType) -> Self {
        Self {
            library_id,
            record_type,
            is_imported_file: false,
        }
    }

    pub fn imported_file(mut self, is_imported_file: bool) -> Self {
        self.is_imported_file = is_imported_file;
        self
    }

    pub fn for_row(row: &PrimaryDataRow) -> Self {
        Self::new(row.library_id(), row.record_type()).imported_file(is_imported_attachment(row))
    }
}

/// Whether an item row is an attachment with a server-stored file.
pub fn is_imported_attachment(row: &PrimaryDataRow) -> bool {
    row.record_type() == RecordType::Item
        && row
            .get_str("linkMode")
            .is_some_and(|mode| IMPORTED_LINK_MODES.contains(&mode))
}

/// Decides whether an actor may edit records in a library.
#[derive(Clone)]
pub struct AccessGuard {
    storage: Arc<dyn StorageBackend>,
}

impl AccessGuard {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn can_edit(&self, actor: Option<&Actor>, target: &EditTarget) -> StacksResult<bool> {
        let Some(actor) = actor else {
            return Ok(true);
        };
        let library = self
            .storage
            .library(target.library_id)
            .await?
            .ok_or(ValidationError::UnknownLibrary {
                library_id: target.library_id,
            })?;

        match library.library_type()? {
            LibraryType::User => {
                let own = match actor.library_id {
                    Some(own) => Some(own),
                    None => self.storage.user_library(actor.user_id).await?,
                };
                Ok(own == Some(target.library_id))
            }
            LibraryType::Group => {
                let Some(membership) = self
                    .storage
                    .membership(target.library_id, actor.user_id)
                    .await?
                else {
                    return Ok(false);
                };
                if !membership.can_edit {
                    return Ok(false);
                }
                if target.record_type == RecordType::Item
                    && target.is_imported_file
                    && !membership.can_edit_files
                {
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    /// `AccessDenied` unless [`can_edit`](Self::can_edit) allows the edit.
    pub async fn edit_check(&self, actor: Option<&Actor>, target: &EditTarget) -> StacksResult<()> {
        if self.can_edit(actor, target).await? {
            return Ok(());
        }
        debug!(
            library_id = %target.library_id,
            record_type = %target.record_type,
            user_id = ?actor.map(|a| a.user_id.get()),
            "edit denied"
        );
        Err(StacksError::AccessDenied {
            record_type: target.record_type,
            library_id: target.library_id,
        })
    }
}
