//! Libraries, memberships and acting users.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StacksError;
use crate::identity::{LibraryId, ShardId, Timestamp, UserId, Version};

/// Kind of library a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    /// A user's personal library.
    User,
    /// A shared group library.
    Group,
}

impl LibraryType {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LibraryType::User => "user",
            LibraryType::Group => "group",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StacksError> {
        match s {
            "user" => Ok(LibraryType::User),
            "group" => Ok(LibraryType::Group),
            _ => Err(StacksError::UnsupportedLibraryType {
                library_type: s.to_string(),
            }),
        }
    }

    /// Path segment used in canonical record URIs.
    pub fn uri_segment(&self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Library metadata as held by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRecord {
    pub library_id: LibraryId,
    /// Raw type string; parsed on use so unknown types surface as errors.
    pub library_type: String,
    pub shard_id: ShardId,
    pub version: Version,
    pub last_updated: Timestamp,
}

impl LibraryRecord {
    pub fn new(library_id: LibraryId, library_type: LibraryType, shard_id: ShardId, now: Timestamp) -> Self {
        Self {
            library_id,
            library_type: library_type.as_db_str().to_string(),
            shard_id,
            version: Version::ZERO,
            last_updated: now,
        }
    }

    pub fn library_type(&self) -> Result<LibraryType, StacksError> {
        LibraryType::from_db_str(&self.library_type)
    }
}

/// A user's rights in a group library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub can_edit: bool,
    pub can_edit_files: bool,
}

impl Membership {
    pub fn reader() -> Self {
        Self::default()
    }

    pub fn editor() -> Self {
        Self {
            can_edit: true,
            can_edit_files: false,
        }
    }

    pub fn file_editor() -> Self {
        Self {
            can_edit: true,
            can_edit_files: true,
        }
    }
}

/// The user on whose behalf a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    /// The user's personal library, when already known to the caller.
    pub library_id: Option<LibraryId>,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            library_id: None,
        }
    }

    pub fn with_library(mut self, library_id: LibraryId) -> Self {
        self.library_id = Some(library_id);
        self
    }
}
