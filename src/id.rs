use crate::error::PtGenericError;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Declares an opaque identifier type tagged by the entity kind that
/// generated it. Equality is byte-equality; identifiers are immutable
/// once assigned.
macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const TAG: &'static str = $tag;

            pub fn fresh() -> Self {
                Self(format!("{}:{}", $tag, Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// abbreviated form for labels and log output
            pub fn short(&self) -> &str {
                let end = usize::min($tag.len() + 9, self.0.len());
                &self.0[..end]
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                if f.alternate() { write!(f, "{}", self.short()) } else { write!(f, "{}", self.0) }
            }
        }

        impl FromStr for $name {
            type Err = PtGenericError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ensure!(
                    s.len() > $tag.len() + 1 && s.starts_with(concat!($tag, ":")),
                    "malformed {} identifier `{}`",
                    $tag,
                    s
                );
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        #[cfg(test)]
        impl quickcheck::Arbitrary for $name {
            fn arbitrary(g: &mut quickcheck::Gen) -> Self {
                Self(format!("{}:{:016x}", $tag, <u64 as quickcheck::Arbitrary>::arbitrary(g)))
            }
        }
    };
}

identifier!(
    /// identity of a versioned object, independent of any content
    ArtifactId,
    "artifact"
);
identifier!(
    /// a specific immutable snapshot of an artifact
    VersionId,
    "version"
);
identifier!(ProjectId, "project");
identifier!(HistoryId, "history");
identifier!(ChangeId, "change");
identifier!(SavePointId, "savepoint");
identifier!(WorkspaceId, "workspace");
identifier!(ConflictId, "conflict");

#[cfg(test)]
mod tests;
