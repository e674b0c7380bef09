//! # Lexauth (authentication and tenant-scoped access control)
//!
//! `lexauth` is the identity core of a multi-tenant legal-practice platform. It
//! registers organizations and their users, issues and rotates session tokens, and
//! guards every request with tenant isolation and role-based permissions.
//!
//! ## Tenant Model
//!
//! Organizations are the tenant boundary. Every user, invitation, onboarding record,
//! audit entry and case carries the owning organization's id, and every store query
//! filters by it. A record that belongs to another tenant is reported as missing.
//!
//! - **Lifecycle:** organizations start in `provisioning`, become `active` once their
//!   details are completed, and are soft-deleted by status transition.
//! - **Soft Deletes:** deleted users keep their rows for the audit trail; their email
//!   can be registered again.
//!
//! ## Sessions
//!
//! Access tokens are short-lived HS256 JWTs carrying user, tenant and role claims.
//! Refresh tokens are opaque random values; only their SHA-256 digest is stored. Each
//! refresh rotates the token, and presenting an already-rotated token revokes every
//! session of the user.
//!
//! ## Authorization
//!
//! Roles map to permissions through a single declarative table (`lexauth::rbac`).
//! Handlers declare the permission they need with the `Authorized<P>` extractor.

pub mod cli;
pub mod lexauth;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}
