//! Descriptors for registry-listener metric names.
//!
//! These names carry their dimensions in a qualified identifier such as
//! `kafka.server:type=BrokerTopicMetrics,name=BytesInPerSec,topic="orders"`.
//! Everything after the first `:` is parsed into attributes.

use std::fmt;

use super::{Attributes, DescriptorBuilder, InstrumentDescriptor, SuffixPolicy};
use crate::error::{BridgeError, Result};
use crate::naming::{CaseType, NameManipulator, NamingContext};

/// Key dropped from parsed attributes; it is already part of the name.
const NAME_KEY: &str = "name";

/// A legacy metric name keyed by group, name and qualified identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedMetricName {
    group: String,
    name: String,
    qualified: String,
}

impl QualifiedMetricName {
    /// Wrap an existing qualified identifier.
    pub fn new(group: impl Into<String>, name: impl Into<String>, qualified: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            qualified: qualified.into(),
        }
    }

    /// Compose the qualified identifier as `group:type=..,name=..[,key=value]*`.
    pub fn compose<'a>(
        group: &str,
        type_name: &str,
        name: &str,
        tags: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut qualified = format!("{group}:type={type_name},{NAME_KEY}={name}");
        for (key, value) in tags {
            qualified.push_str(&format!(",{key}={value}"));
        }
        Self::new(group, name, qualified)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified(&self) -> &str {
        &self.qualified
    }
}

impl fmt::Display for QualifiedMetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified)
    }
}

/// Builds descriptors for [`QualifiedMetricName`]s.
#[derive(Debug, Clone)]
pub struct QualifiedDescriptorBuilder {
    manipulator: NameManipulator,
}

impl Default for QualifiedDescriptorBuilder {
    fn default() -> Self {
        Self {
            manipulator: NameManipulator::of(&[CaseType::Camel, CaseType::FirstUpper]),
        }
    }
}

impl QualifiedDescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name_manipulator(mut self, manipulator: NameManipulator) -> Self {
        self.manipulator = manipulator;
        self
    }
}

impl DescriptorBuilder for QualifiedDescriptorBuilder {
    type Id = QualifiedMetricName;

    fn build(&self, id: &QualifiedMetricName, context: &NamingContext) -> Result<InstrumentDescriptor> {
        let mut attributes = context.attributes().clone();
        attributes.merge(&parse_attributes(&id.qualified)?);

        Ok(InstrumentDescriptor::new(
            format!("{}.{}", id.group, self.manipulator.apply(&id.name)),
            attributes,
            self.manipulator.clone(),
            SuffixPolicy::Append,
        ))
    }
}

/// Parse the `key=value` list following the first `:`.
///
/// Empty tokens (for example from a trailing comma) are skipped; a token
/// without `=` is rejected.
fn parse_attributes(qualified: &str) -> Result<Attributes> {
    let body = qualified.split_once(':').map_or(qualified, |(_, rest)| rest);

    let mut attributes = Attributes::new();
    for token in body.split(',').filter(|token| !token.is_empty()) {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| BridgeError::MalformedAttribute {
                identifier: qualified.to_string(),
                token: token.to_string(),
            })?;
        if key != NAME_KEY {
            attributes.insert(key, value.trim_matches('"'));
        }
    }
    Ok(attributes)
}
