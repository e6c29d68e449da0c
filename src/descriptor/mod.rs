//! Instrument descriptors: the (name, attributes, description) triple used to
//! register one instrument.
//!
//! Descriptors are values. Deriving a variant with [`InstrumentDescriptor::with_suffix`]
//! or [`InstrumentDescriptor::with_attribute`] returns a new descriptor and
//! leaves the receiver untouched.

pub mod qualified;
pub mod tagged;

pub use qualified::{QualifiedDescriptorBuilder, QualifiedMetricName};
pub use tagged::{TaggedDescriptorBuilder, TaggedMetricName};

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use opentelemetry::KeyValue;

use crate::error::Result;
use crate::naming::{NameManipulator, NamingContext};

/// String attributes with unique keys; a later insert wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Merge `other` on top of `self`.
    pub fn merge(&mut self, other: &Attributes) -> &mut Self {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Attributes in the shape the OpenTelemetry API records.
    pub fn to_key_values(&self) -> Vec<KeyValue> {
        self.0
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

/// How a name suffix is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixPolicy {
    /// Strip a trailing occurrence of the suffix (optionally preceded by
    /// `-`, `_` or `.`) before appending it. Applying a suffix twice is a
    /// no-op the second time.
    ReplaceTrailing,
    /// Always append.
    Append,
}

/// The computed identity of one instrument.
///
/// Equality and hashing consider only the name and the attributes.
#[derive(Debug, Clone)]
pub struct InstrumentDescriptor {
    name: String,
    attributes: Attributes,
    description: Option<String>,
    manipulator: NameManipulator,
    suffix_policy: SuffixPolicy,
}

impl InstrumentDescriptor {
    pub fn new(
        name: impl Into<String>,
        attributes: Attributes,
        manipulator: NameManipulator,
        suffix_policy: SuffixPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            attributes,
            description: None,
            manipulator,
            suffix_policy,
        }
    }

    /// Attach a description; blank descriptions are dropped.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = if description.trim().is_empty() {
            None
        } else {
            Some(description)
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Derive a descriptor whose name ends with the case-transformed `suffix`.
    ///
    /// A missing or blank suffix yields an equal descriptor.
    #[must_use]
    pub fn with_suffix<'a>(&self, suffix: impl Into<Option<&'a str>>) -> Self {
        let suffix = match suffix.into() {
            Some(s) if !s.trim().is_empty() => s,
            _ => return self.clone(),
        };
        let head = match self.suffix_policy {
            SuffixPolicy::ReplaceTrailing => strip_trailing_suffix(&self.name, suffix),
            SuffixPolicy::Append => self.name.as_str(),
        };
        Self {
            name: format!("{head}.{}", self.manipulator.apply(suffix)),
            ..self.clone()
        }
    }

    /// Derive a descriptor with extra attributes merged over the current ones.
    #[must_use]
    pub fn with_attribute(&self, mutator: impl FnOnce(&mut Attributes)) -> Self {
        let mut attributes = self.attributes.clone();
        mutator(&mut attributes);
        Self {
            attributes,
            ..self.clone()
        }
    }
}

fn strip_trailing_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    let split = match name.len().checked_sub(suffix.len()) {
        Some(split) if name.is_char_boundary(split) => split,
        _ => return name,
    };
    if !name[split..].eq_ignore_ascii_case(suffix) {
        return name;
    }
    let head = &name[..split];
    head.strip_suffix(&['-', '_', '.'][..]).unwrap_or(head)
}

impl PartialEq for InstrumentDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.attributes == other.attributes
    }
}

impl Eq for InstrumentDescriptor {}

impl Hash for InstrumentDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.attributes.hash(state);
    }
}

impl fmt::Display for InstrumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.attributes)
    }
}

/// Derives descriptors from one shape of legacy metric identifier.
pub trait DescriptorBuilder: Send + Sync {
    /// Legacy identifier consumed by this builder. Keys the instrument
    /// registry, so equality must be value equality.
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn build(&self, id: &Self::Id, context: &NamingContext) -> Result<InstrumentDescriptor>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::CaseType;

    fn descriptor(policy: SuffixPolicy) -> InstrumentDescriptor {
        let attributes: Attributes = [("topic", "orders")].into_iter().collect();
        InstrumentDescriptor::new(
            "kafka.server.bytesIn",
            attributes,
            NameManipulator::of(&[CaseType::Camel, CaseType::FirstLower]),
            policy,
        )
    }

    #[test]
    fn test_blank_suffix_is_identity() {
        let d = descriptor(SuffixPolicy::ReplaceTrailing);
        assert_eq!(d.with_suffix(""), d);
        assert_eq!(d.with_suffix("  "), d);
        assert_eq!(d.with_suffix(None::<&str>), d);
        assert_eq!(d.with_suffix(None::<&str>).name(), d.name());
    }

    #[test]
    fn test_replace_trailing_suffix_is_idempotent() {
        let d = descriptor(SuffixPolicy::ReplaceTrailing);
        let once = d.with_suffix("count");
        let twice = once.with_suffix("count");
        assert_eq!(once.name(), "kafka.server.bytesIn.count");
        assert_eq!(twice.name(), "kafka.server.bytesIn.count");
        assert_eq!(twice.name().matches("count").count(), 1);
    }

    #[test]
    fn test_replace_trailing_suffix_case_insensitive() {
        let d = InstrumentDescriptor::new(
            "kafka.server.request-Count",
            Attributes::new(),
            NameManipulator::identity(),
            SuffixPolicy::ReplaceTrailing,
        );
        assert_eq!(d.with_suffix("count").name(), "kafka.server.request.count");

        let d = InstrumentDescriptor::new(
            "kafka.server.requestCount",
            Attributes::new(),
            NameManipulator::identity(),
            SuffixPolicy::ReplaceTrailing,
        );
        assert_eq!(d.with_suffix("count").name(), "kafka.server.request.count");
    }

    #[test]
    fn test_append_suffix() {
        let d = descriptor(SuffixPolicy::Append);
        assert_eq!(
            d.with_suffix("count").with_suffix("count").name(),
            "kafka.server.bytesIn.count.count"
        );
        assert_eq!(d.with_suffix("std-dev").name(), "kafka.server.bytesIn.stdDev");
    }

    #[test]
    fn test_with_attribute_does_not_mutate_receiver() {
        let d = descriptor(SuffixPolicy::Append);
        let derived = d.with_attribute(|a| {
            a.insert("percentile", "0.99").insert("topic", "payments");
        });

        assert_eq!(d.attributes().get("topic"), Some("orders"));
        assert_eq!(d.attributes().get("percentile"), None);
        assert_eq!(derived.attributes().get("topic"), Some("payments"));
        assert_eq!(derived.attributes().get("percentile"), Some("0.99"));
        assert_ne!(d, derived);
    }

    #[test]
    fn test_equality_ignores_description() {
        let a = descriptor(SuffixPolicy::Append).with_description("bytes in");
        let b = descriptor(SuffixPolicy::ReplaceTrailing);
        assert_eq!(a, b);
        assert_eq!(a.description(), Some("bytes in"));
        assert_eq!(b.description(), None);
    }

    #[test]
    fn test_display() {
        let d = descriptor(SuffixPolicy::Append);
        assert_eq!(d.to_string(), "kafka.server.bytesIn{topic=orders}");
    }
}
