use crate::id::{ConflictId, HistoryId, VersionId};
use std::fmt::{self, Display, Formatter};

pub type PtResult<T> = Result<T, PtGenericError>;
pub type PtGenericError = anyhow::Error;

// anyhow is the backbone; this enum exists for the cases callers need to
// match on (the RPC layer maps these onto its status codes)
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub enum PolytopeError {
    /// named entity does not exist
    NotFound(String),
    /// name or id collision
    Duplicate(String),
    /// a merge produced unresolved conflicts
    Conflict(Vec<ConflictId>),
    /// `save` attempted while conflicts are unresolved
    ConflictsPending(Vec<ConflictId>),
    /// concurrent progress on the history requires `update` first
    OutOfDate { history: HistoryId, expected: VersionId, actual: VersionId },
    InvalidParameter(String),
    /// capability check failed
    Unauthorized(String),
    NotADirectory(String),
    PathExists(String),
    ParentMissing(String),
    /// persisted data violates an invariant; never retried
    Corrupt(String),
    /// a case documented as impossible occurred
    Internal(String),
}

pub trait PtErrorExt {
    fn try_into_pt_error(self) -> PtResult<PolytopeError>;
    fn try_into_out_of_date_err(self) -> PtResult<(HistoryId, VersionId, VersionId)>;
    fn try_into_conflicts(self) -> PtResult<Vec<ConflictId>>;
}

impl PtErrorExt for PtGenericError {
    fn try_into_pt_error(self) -> PtResult<PolytopeError> {
        self.downcast::<PolytopeError>()
    }

    fn try_into_out_of_date_err(self) -> PtResult<(HistoryId, VersionId, VersionId)> {
        match self.try_into_pt_error()? {
            PolytopeError::OutOfDate { history, expected, actual } =>
                Ok((history, expected, actual)),
            err => Err(anyhow!(err)),
        }
    }

    fn try_into_conflicts(self) -> PtResult<Vec<ConflictId>> {
        match self.try_into_pt_error()? {
            PolytopeError::Conflict(conflicts) | PolytopeError::ConflictsPending(conflicts) =>
                Ok(conflicts),
            err => Err(anyhow!(err)),
        }
    }
}

pub trait PtResultExt {
    fn is_not_found_err(&self) -> bool;
    fn is_out_of_date_err(&self) -> bool;
    fn is_fatal(&self) -> bool;
}

macro_rules! error_ext_is_method {
    ($method:ident) => {
        fn $method(&self) -> bool {
            match self {
                Ok(..) => false,
                Err(err) => err.$method(),
            }
        }
    };
}

impl<T> PtResultExt for PtResult<T> {
    error_ext_is_method!(is_not_found_err);

    error_ext_is_method!(is_out_of_date_err);

    error_ext_is_method!(is_fatal);
}

impl PtResultExt for PtGenericError {
    fn is_not_found_err(&self) -> bool {
        matches!(self.downcast_ref::<PolytopeError>(), Some(PolytopeError::NotFound(..)))
    }

    fn is_out_of_date_err(&self) -> bool {
        matches!(self.downcast_ref::<PolytopeError>(), Some(PolytopeError::OutOfDate { .. }))
    }

    // fatal errors must abort the current operation before its final batch
    // is written; everything else is reportable to the caller and retryable
    fn is_fatal(&self) -> bool {
        match self.downcast_ref::<PolytopeError>() {
            Some(err) =>
                matches!(err, PolytopeError::Corrupt(..) | PolytopeError::Internal(..)),
            None => true,
        }
    }
}

impl Display for PolytopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PolytopeError::NotFound(what) => write!(f, "{} not found", what),
            PolytopeError::Duplicate(what) => write!(f, "{} already exists", what),
            PolytopeError::Conflict(conflicts) =>
                write!(f, "merge produced {} unresolved conflict(s)", conflicts.len()),
            PolytopeError::ConflictsPending(conflicts) => write!(
                f,
                "workspace has {} unresolved conflict(s); resolve them before saving",
                conflicts.len()
            ),
            PolytopeError::OutOfDate { history, expected, actual } => write!(
                f,
                "history `{}` has advanced (expected tip `{}`, found `{}`); update first",
                history, expected, actual
            ),
            PolytopeError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            PolytopeError::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            PolytopeError::NotADirectory(path) => write!(f, "`{}` is not a directory", path),
            PolytopeError::PathExists(path) => write!(f, "path `{}` already exists", path),
            PolytopeError::ParentMissing(path) =>
                write!(f, "parent directory of `{}` does not exist", path),
            PolytopeError::Corrupt(msg) => write!(f, "corrupt depot data: {}", msg),
            PolytopeError::Internal(msg) => write!(f, "internal invariant violated: {}", msg),
        }
    }
}
