//! Access control lists attached to created nodes.
//!
//! Mirrors the ZooKeeper model: an ACL entry grants a permission set to one
//! `(scheme, id)` identity. The lock only forwards ACLs to the coordination
//! service; enforcement happens on the other side of [`crate::Coordinator`].

use bitflags::bitflags;

bitflags! {
    /// Permission bits, numerically identical to ZooKeeper's.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perms: u32 {
        /// Read node data and list children.
        const READ = 1;
        /// Set node data.
        const WRITE = 1 << 1;
        /// Create children.
        const CREATE = 1 << 2;
        /// Delete children.
        const DELETE = 1 << 3;
        /// Change the ACL.
        const ADMIN = 1 << 4;
        /// Every permission.
        const ALL = Self::READ.bits()
            | Self::WRITE.bits()
            | Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::ADMIN.bits();
    }
}

/// One ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    /// Granted permissions.
    pub perms: Perms,
    /// Authentication scheme (`world`, `digest`, `ip`, ...).
    pub scheme: String,
    /// Identity within the scheme.
    pub id: String,
}

impl Acl {
    /// Entry for an arbitrary `(scheme, id)` identity.
    pub fn new(perms: Perms, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self { perms, scheme: scheme.into(), id: id.into() }
    }

    /// Single-entry list granting `perms` to everyone (`world:anyone`).
    pub fn world(perms: Perms) -> Vec<Self> {
        vec![Self::new(perms, "world", "anyone")]
    }

    /// True if this entry applies to `(scheme, id)`.
    ///
    /// `world:anyone` matches every identity.
    pub fn matches(&self, scheme: &str, id: &str) -> bool {
        (self.scheme == "world" && self.id == "anyone") || (self.scheme == scheme && self.id == id)
    }
}
