//! Store configuration.

use serde::{Deserialize, Serialize};

/// Default wrapper-cache size at which dead entries are swept.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 256;

/// Per-store settings.
///
/// ```rust,ignore
/// let options = StoreOptions::from_json(r#"{ "label": "cart" }"#)?;
/// let state = create_managed_state_with(initial, options)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Name attached to this store's log events.
    pub label: Option<String>,

    /// Wrapper-cache size at which entries whose wrappers were dropped are
    /// swept. After a sweep the next threshold is twice the surviving size.
    pub wrapper_sweep_threshold: usize,
}

impl StoreOptions {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            label: None,
            wrapper_sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = StoreOptions::from_json(r#"{ "label": "cart" }"#).unwrap();
        assert_eq!(options.label.as_deref(), Some("cart"));
        assert_eq!(options.wrapper_sweep_threshold, DEFAULT_SWEEP_THRESHOLD);

        assert_eq!(StoreOptions::from_json("{}").unwrap(), StoreOptions::default());
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(StoreOptions::from_json(r#"{ "wrapper_sweep_threshold": "many" }"#).is_err());
    }
}
