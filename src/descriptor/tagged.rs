//! Descriptors for tag-based metric names (`group`, `name`, `tags`).
//!
//! Names are rooted at the context namespace. Group fragments that repeat
//! the namespace, and the noise word `metrics`, are removed so that a group
//! `kafka.server` under namespace `kafka.server` does not produce
//! `kafka.server.kafka.server.*`.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Attributes, DescriptorBuilder, InstrumentDescriptor, SuffixPolicy};
use crate::error::Result;
use crate::naming::{CaseType, NameManipulator, NamingContext};

static AUTHENTICATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)authentication").unwrap());

/// Tag key (compared as a lower-case single word) never copied into attributes.
pub const EXCLUDED_TAG: &str = "brokerid";

const NAME_NOISE: [&str; 2] = ["-total", "-count"];
const GROUP_NOISE: &str = "metrics";

/// A tag-based legacy metric name.
///
/// Identity is `group`, `name` and `tags`; the description is informational.
#[derive(Debug, Clone)]
pub struct TaggedMetricName {
    group: String,
    name: String,
    tags: BTreeMap<String, String>,
    description: String,
}

impl TaggedMetricName {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            tags: BTreeMap::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for TaggedMetricName {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.name == other.name && self.tags == other.tags
    }
}

impl Eq for TaggedMetricName {}

impl Hash for TaggedMetricName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.name.hash(state);
        self.tags.hash(state);
    }
}

impl fmt::Display for TaggedMetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)?;
        if !self.tags.is_empty() {
            let tags: Attributes = self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            write!(f, "{tags}")?;
        }
        Ok(())
    }
}

/// Builds descriptors for [`TaggedMetricName`]s.
#[derive(Debug, Clone)]
pub struct TaggedDescriptorBuilder {
    manipulator: NameManipulator,
}

impl Default for TaggedDescriptorBuilder {
    fn default() -> Self {
        Self {
            manipulator: NameManipulator::of(&[CaseType::Camel, CaseType::FirstLower]),
        }
    }
}

impl TaggedDescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name_manipulator(mut self, manipulator: NameManipulator) -> Self {
        self.manipulator = manipulator;
        self
    }

    fn build_name(&self, id: &TaggedMetricName, namespace: &str) -> String {
        let group = normalize_group(&id.group, namespace);
        let name = normalize_name(&id.name);
        if group.trim().is_empty() {
            format!("{namespace}.{}", self.manipulator.apply(&name))
        } else {
            format!(
                "{namespace}.{}.{}",
                self.manipulator.apply(&group),
                self.manipulator.apply(&name)
            )
        }
    }
}

impl DescriptorBuilder for TaggedDescriptorBuilder {
    type Id = TaggedMetricName;

    fn build(&self, id: &TaggedMetricName, context: &NamingContext) -> Result<InstrumentDescriptor> {
        let mut attributes = context.attributes().clone();
        for (key, value) in &id.tags {
            if CaseType::LowerSingleWord.apply(key) != EXCLUDED_TAG {
                attributes.insert(key.as_str(), value.as_str());
            }
        }

        let descriptor = InstrumentDescriptor::new(
            self.build_name(id, context.namespace()),
            attributes,
            self.manipulator.clone(),
            SuffixPolicy::ReplaceTrailing,
        );
        Ok(descriptor.with_description(id.description.as_str()))
    }
}

/// Strip namespace fragments and `metrics` from a group, then trim the
/// separators left dangling at either end.
fn normalize_group(group: &str, namespace: &str) -> String {
    let tokens = namespace
        .split(&['.', '-', '_'][..])
        .filter(|token| !token.is_empty())
        .chain(std::iter::once(GROUP_NOISE));

    let stripped = tokens.fold(group.to_string(), |acc, token| remove_ignore_case(&acc, token, true));
    stripped.trim_matches(&['.', '-', '_'][..]).to_string()
}

fn normalize_name(name: &str) -> String {
    let stripped = NAME_NOISE
        .iter()
        .fold(name.to_string(), |acc, noise| remove_ignore_case(&acc, noise, false));
    AUTHENTICATION.replace_all(&stripped, "Auth").into_owned()
}

/// Remove every ASCII case-insensitive occurrence of `part`. With
/// `absorb_hyphens`, one adjacent hyphen goes too.
fn remove_ignore_case(value: &str, part: &str, absorb_hyphens: bool) -> String {
    if part.is_empty() {
        return value.to_string();
    }
    // ASCII lowering keeps byte offsets aligned with `value`.
    let haystack = value.to_ascii_lowercase();
    let needle = part.to_ascii_lowercase();

    let mut out = String::with_capacity(value.len());
    let mut cursor = 0;
    while let Some(found) = haystack[cursor..].find(&needle) {
        let start = cursor + found;
        let mut end = start + needle.len();
        let mut head = &value[cursor..start];
        if absorb_hyphens {
            // Take the hyphen after the occurrence, or the one before it when
            // the occurrence ends a word, so neighbours stay separated.
            if value[end..].starts_with('-') {
                end += 1;
            } else {
                head = head.strip_suffix('-').unwrap_or(head);
            }
        }
        out.push_str(head);
        cursor = end;
    }
    out.push_str(&value[cursor..]);
    out
}
