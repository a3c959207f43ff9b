//! Helpers over the `/`-separated paths a workspace projects its baseline
//! onto. The root directory is the empty path `""`.

use crate::error::{PolytopeError, PtResult};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// defines what is an invalid binding name (anything else is valid)
    // a name is invalid if it is empty, is `.` or `..`, or contains a
    // separator or NUL
    static ref INVALID_NAME_REGEX: Regex = Regex::new(r"^\.{1,2}$|/|\x00").unwrap();
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !INVALID_NAME_REGEX.is_match(name)
}

pub fn validate_name(name: &str) -> PtResult<()> {
    if !is_valid_name(name) {
        bail!(PolytopeError::InvalidParameter(format!("invalid binding name `{}`", name)));
    }
    Ok(())
}

/// splits a workspace path into its components, validating each one;
/// the root path `""` has no components
pub fn components(path: &str) -> PtResult<Vec<&str>> {
    if path.is_empty() {
        return Ok(vec![]);
    }
    let components = path.split('/').collect::<Vec<_>>();
    for component in &components {
        validate_name(component)?;
    }
    Ok(components)
}

/// splits a path into `(parent, name)`; the parent of a top-level entry is
/// the root path `""`
pub fn parent_and_name(path: &str) -> PtResult<(&str, &str)> {
    let components = components(path)?;
    let name = match components.last() {
        Some(&name) => name,
        None =>
            bail!(PolytopeError::InvalidParameter("the root path has no parent".to_owned())),
    };
    let parent = &path[..path.len() - name.len()];
    Ok((parent.strip_suffix('/').unwrap_or(parent), name))
}

pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() { name.to_owned() } else { format!("{}/{}", parent, name) }
}

/// `true` if `path` is `ancestor` itself or lies underneath it
pub fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}
