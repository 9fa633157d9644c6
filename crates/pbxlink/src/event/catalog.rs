//! Name to kind lookup built once at startup.

use std::collections::HashMap;

use strum::IntoEnumIterator;

use super::EventKind;

/// Resolves event names to [`EventKind`] tags.
///
/// Lookup ignores case. Names the catalog does not know resolve to
/// [`EventKind::Generic`].
#[derive(Debug, Clone)]
pub struct EventCatalog {
    kinds: HashMap<String, EventKind>,
}

impl EventCatalog {
    /// Catalog covering every named [`EventKind`].
    #[must_use]
    pub fn standard() -> Self {
        let kinds = EventKind::iter()
            .filter(|kind| !matches!(kind, EventKind::Generic | EventKind::Aggregate))
            .map(|kind| (kind.to_string().to_ascii_lowercase(), kind))
            .collect();
        Self { kinds }
    }

    /// Maps an extra name to `kind`, for example a vendor alias.
    #[must_use]
    pub fn with_alias(mut self, name: &str, kind: EventKind) -> Self {
        self.kinds.insert(name.to_ascii_lowercase(), kind);
        self
    }

    /// Kind of the event called `name`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> EventKind {
        self.kinds
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(EventKind::Generic)
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
