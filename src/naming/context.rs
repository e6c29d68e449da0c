//! Naming context derived from the legacy system's contextual labels.

use crate::descriptor::Attributes;
use crate::naming::case::CaseType;

/// Contextual label holding the namespace of every derived instrument.
pub const NAMESPACE_KEY: &str = "_namespace";

/// Prefix stripped from contextual label keys before they become attributes.
pub const LABEL_PREFIX: &str = "kafka.";

/// Namespace and base attributes shared by every descriptor built from it.
///
/// A context is immutable; re-initialisation means building a new one and
/// swapping it in wherever descriptors are built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingContext {
    namespace: String,
    attributes: Attributes,
}

impl NamingContext {
    /// Build a context from contextual labels.
    ///
    /// The value under [`NAMESPACE_KEY`] becomes the namespace (empty when
    /// absent). Every other label becomes a base attribute whose key has
    /// [`LABEL_PREFIX`] stripped and is camel-cased: `kafka.cluster.id`
    /// turns into `clusterId`.
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut namespace = String::new();
        let mut attributes = Attributes::new();
        for (key, value) in labels {
            let key = key.as_ref();
            if key == NAMESPACE_KEY {
                namespace = value.into();
                continue;
            }
            let stripped = key.strip_prefix(LABEL_PREFIX).unwrap_or(key);
            attributes.insert(CaseType::Camel.apply(stripped), value);
        }
        Self {
            namespace,
            attributes,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Base attributes merged into every descriptor.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context() {
        let context = NamingContext::default();
        assert_eq!(context.namespace(), "");
        assert!(context.attributes().is_empty());
    }

    #[test]
    fn test_from_labels() {
        let context = NamingContext::from_labels([
            (NAMESPACE_KEY, "kafka.server"),
            ("kafka.cluster.id", "abc-123"),
            ("kafka.broker.id", "1"),
            ("rack", "eu-1a"),
        ]);

        assert_eq!(context.namespace(), "kafka.server");
        assert_eq!(context.attributes().len(), 3);
        assert_eq!(context.attributes().get("clusterId"), Some("abc-123"));
        assert_eq!(context.attributes().get("brokerId"), Some("1"));
        assert_eq!(context.attributes().get("rack"), Some("eu-1a"));
    }

    #[test]
    fn test_missing_namespace_is_empty() {
        let context = NamingContext::from_labels([("kafka.cluster.id", "abc")]);
        assert_eq!(context.namespace(), "");
        assert_eq!(context.attributes().get("clusterId"), Some("abc"));
    }
}
