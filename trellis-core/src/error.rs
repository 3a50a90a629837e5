//! Error types.

use thiserror::Error;

use crate::graph::Path;

/// Errors surfaced by stores, wrappers, and computed evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The value was never produced by `create_managed_state`.
    #[error("value is not managed by any store")]
    NotManaged,

    /// A store root must be a record or a sequence.
    #[error("expected a record or sequence, found {found}")]
    NotAContainer { found: &'static str },

    /// A computed's evaluation function failed.
    #[error("evaluation of `{path}` failed: {message}")]
    Evaluation { path: Path, message: String },

    /// A computed read itself, directly or through other computeds.
    #[error("computed `{path}` depends on itself")]
    Cycle { path: Path },

    #[error("expected {expected} at `{path}`, found {found}")]
    TypeMismatch {
        path: Path,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid key `{key}` for sequence at `{path}`")]
    InvalidKey { path: Path, key: String },

    /// Growing a sequence to `requested` elements could not be allocated.
    #[error("cannot grow sequence at `{path}` to {requested} elements")]
    CapacityExceeded { path: Path, requested: usize },

    /// Plain assignment onto a derived accessor. Use `define` to replace it.
    #[error("`{path}` is a derived accessor and cannot be assigned")]
    ReadOnly { path: Path },

    /// Evaluation functions must not write to state.
    #[error("cannot write `{path}` while evaluating `{computed}`")]
    WriteInComputed { path: Path, computed: Path },
}

impl StoreError {
    /// An evaluation failure raised from inside an evaluation function. The
    /// engine fills in the computed's path when the error leaves it.
    pub fn evaluation(message: impl Into<String>) -> Self {
        StoreError::Evaluation {
            path: Path::root(),
            message: message.into(),
        }
    }

    /// Attribute an anonymous evaluation failure to `path`.
    pub(crate) fn attributed_to(self, computed: &Path) -> Self {
        match self {
            StoreError::Evaluation { path, message } if path.is_root() => StoreError::Evaluation {
                path: computed.clone(),
                message,
            },
            other => other,
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_evaluation_errors_get_a_path() {
        let err = StoreError::evaluation("boom").attributed_to(&Path::from("cart.total"));
        assert_eq!(err.to_string(), "evaluation of `cart.total` failed: boom");
    }

    #[test]
    fn attributed_errors_keep_their_origin() {
        let inner = StoreError::evaluation("boom").attributed_to(&Path::from("tax"));
        let outer = inner.attributed_to(&Path::from("total"));
        assert!(matches!(outer, StoreError::Evaluation { ref path, .. } if path == &Path::from("tax")));
    }
}
