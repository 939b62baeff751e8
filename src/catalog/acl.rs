//! Access control entries of catalog entities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Wildcard member matching any user.
pub const ANY_MEMBER: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudyPermissions {
    ViewStudy,
    UpdateStudy,
    ShareStudy,
    CreateFiles,
    ViewFiles,
    CreateSamples,
    ViewSamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SamplePermissions {
    View,
    Update,
    Delete,
    Share,
    CreateAnnotations,
    ViewAnnotations,
    UpdateAnnotations,
    DeleteAnnotations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilePermissions {
    View,
    ViewHeader,
    ViewContent,
    Download,
    Update,
    Delete,
    Share,
}

/// One member's permissions on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl<P: Ord> {
    pub member: String,
    pub permissions: BTreeSet<P>,
}

/// Permissions granted to `user` by an ACL list, `None` when no entry applies.
///
/// A user-specific entry takes precedence over the wildcard entry.
pub fn permissions_for<'a, P: Ord>(acl: &'a [Acl<P>], user: &str) -> Option<&'a BTreeSet<P>> {
    acl.iter()
        .find(|a| a.member == user)
        .or_else(|| acl.iter().find(|a| a.member == ANY_MEMBER))
        .map(|a| &a.permissions)
}
