//! Capability check hook. Everything else about users and permissions
//! lives outside the core; operations call through this seam before
//! touching workspace state.

use crate::error::{PolytopeError, PtResult};

pub trait AccessCheck: Send + Sync {
    /// `operation` names the entry point being attempted, e.g.
    /// `workspace.save`
    fn check(&self, user: &str, operation: &str) -> PtResult<()>;
}

/// default hook: every capability check passes
pub struct AllowAll;

impl AccessCheck for AllowAll {
    fn check(&self, _user: &str, _operation: &str) -> PtResult<()> {
        Ok(())
    }
}

/// hook that denies everything; useful for exercising the unauthorized path
pub struct DenyAll;

impl AccessCheck for DenyAll {
    fn check(&self, user: &str, operation: &str) -> PtResult<()> {
        bail!(PolytopeError::Unauthorized(format!(
            "user `{}` may not perform `{}`",
            user, operation
        )))
    }
}
