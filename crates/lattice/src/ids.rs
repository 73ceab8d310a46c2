// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Stable identifiers shared by the module model and the publication registry
//!
//! Both halves of the toolkit correlate through two values: the
//! [`ApplicationModuleIdentifier`] naming a module in the derived model, and
//! the [`PublicationTargetIdentifier`] naming the listener a publication is
//! destined for. [`RoutingTarget`] is the externalization coordinate parsed
//! from an event's routing declaration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Separator reserved inside routing declarations and dependency
/// declarations (`module::namedInterface`, `target::key`).
pub const TARGET_SEPARATOR: &str = "::";

/// Identifier of an application module.
///
/// A non-empty string that never contains the reserved `::` separator.
/// Identifiers are immutable and totally ordered by lexicographic
/// comparison, which keeps module enumeration deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationModuleIdentifier(String);

impl ApplicationModuleIdentifier {
    /// Creates an identifier from the given string.
    ///
    /// Leading/trailing whitespace is trimmed.
    ///
    /// # Errors
    /// Returns `InvalidValue` if the trimmed string is empty or contains
    /// the reserved `::` separator.
    pub fn of(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidValue(
                "module identifier must not be empty".to_string(),
            ));
        }
        if trimmed.contains(TARGET_SEPARATOR) {
            return Err(Error::InvalidValue(format!(
                "module identifier '{}' must not contain '{}'",
                trimmed, TARGET_SEPARATOR
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a publication target.
///
/// Names the listener a publication is destined for. Typically a fully
/// qualified method reference, but the registry treats it as opaque;
/// equality is plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicationTargetIdentifier(String);

impl PublicationTargetIdentifier {
    /// Creates a target identifier from the given string.
    ///
    /// # Errors
    /// Returns `InvalidValue` if the string is empty.
    pub fn of(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::InvalidValue(
                "publication target identifier must not be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicationTargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An externalization routing coordinate: a target plus an optional key.
///
/// Textual form is `target` or `target::key`. Either half may be an
/// embedded expression of the form `#{…}`, evaluated against the event
/// at send time.
///
/// Note on hashing: `Hash` covers the target half only, so
/// `"target"` and `"target::"` collide while comparing unequal. Callers
/// relying on hashed collections get one bucket for both forms; lookups
/// still disambiguate through `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTarget {
    target: String,
    key: Option<String>,
}

impl RoutingTarget {
    /// Parses the textual form into a [`ParsedRoutingTarget`].
    ///
    /// Both halves are trimmed. An absent or blank target leaves the
    /// parse unresolved; resolution is deferred to
    /// [`ParsedRoutingTarget::to_routing_target`].
    pub fn parse(value: impl AsRef<str>) -> ParsedRoutingTarget {
        let value = value.as_ref();
        let (raw_target, raw_key) = match value.find(TARGET_SEPARATOR) {
            Some(index) => (
                &value[..index],
                Some(&value[index + TARGET_SEPARATOR.len()..]),
            ),
            None => (value, None),
        };

        let target = {
            let trimmed = raw_target.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        let key = raw_key.map(|k| k.trim().to_string());

        ParsedRoutingTarget { target, key }
    }

    /// Starts building a routing target from a known target name.
    pub fn for_target(target: impl Into<String>) -> RoutingTargetBuilder {
        RoutingTargetBuilder {
            target: target.into(),
        }
    }

    /// The target half.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The key half, if one was declared.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Whether the key half is an embedded `#{…}` expression.
    pub fn has_key_expression(&self) -> bool {
        self.key.as_deref().is_some_and(is_expression)
    }

    /// Whether the target half is an embedded `#{…}` expression.
    pub fn has_target_expression(&self) -> bool {
        is_expression(&self.target)
    }

    /// Whether either half is an embedded `#{…}` expression.
    pub fn has_expression(&self) -> bool {
        self.has_target_expression() || self.has_key_expression()
    }

    /// Returns a copy with the key replaced.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            target: self.target.clone(),
            key: Some(key.into()),
        }
    }

    /// Returns a copy with the target replaced, keeping the key.
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            key: self.key.clone(),
        }
    }
}

fn is_expression(value: &str) -> bool {
    value.starts_with("#{") && value.ends_with('}')
}

// Hash intentionally covers the target half only; see type docs.
impl Hash for RoutingTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}{}{}", self.target, TARGET_SEPARATOR, key),
            None => f.write_str(&self.target),
        }
    }
}

/// Builder step for [`RoutingTarget::for_target`].
#[derive(Debug, Clone)]
pub struct RoutingTargetBuilder {
    target: String,
}

impl RoutingTargetBuilder {
    /// Completes the build with a key.
    pub fn and_key(self, key: impl Into<String>) -> RoutingTarget {
        RoutingTarget {
            target: self.target,
            key: Some(key.into()),
        }
    }

    /// Completes the build without a key.
    pub fn without_key(self) -> RoutingTarget {
        RoutingTarget {
            target: self.target,
            key: None,
        }
    }
}

/// Outcome of parsing a routing declaration, before resolution.
///
/// Carries whatever halves the text contained; a declaration with no
/// usable target stays representable here and only fails when resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRoutingTarget {
    target: Option<String>,
    key: Option<String>,
}

impl ParsedRoutingTarget {
    /// The parsed target half, if non-blank.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// The parsed key half. `Some("")` means a trailing `::` was present.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Whether either parsed half is an embedded `#{…}` expression.
    pub fn has_expression(&self) -> bool {
        self.target.as_deref().is_some_and(is_expression)
            || self.key.as_deref().is_some_and(is_expression)
    }

    /// Resolves into a [`RoutingTarget`].
    ///
    /// # Errors
    /// Returns `InvalidValue` if no target half was present.
    pub fn to_routing_target(&self) -> Result<RoutingTarget> {
        let target = self.target.clone().ok_or_else(|| {
            Error::InvalidValue("routing declaration does not define a target".to_string())
        })?;
        Ok(RoutingTarget {
            target,
            key: self.key.clone(),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(value: &RoutingTarget) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_module_identifier_accepts_plain_names() {
        let id = ApplicationModuleIdentifier::of("orders").unwrap();
        assert_eq!(id.as_str(), "orders");
        assert_eq!(id.to_string(), "orders");
    }

    #[test]
    fn test_module_identifier_trims() {
        let id = ApplicationModuleIdentifier::of("  inventory ").unwrap();
        assert_eq!(id.as_str(), "inventory");
    }

    #[test]
    fn test_module_identifier_rejects_empty() {
        assert!(ApplicationModuleIdentifier::of("").is_err());
        assert!(ApplicationModuleIdentifier::of("   ").is_err());
    }

    #[test]
    fn test_module_identifier_rejects_separator() {
        assert!(ApplicationModuleIdentifier::of("orders::api").is_err());
    }

    #[test]
    fn test_module_identifier_ordering_is_lexicographic() {
        let mut ids = vec![
            ApplicationModuleIdentifier::of("orders").unwrap(),
            ApplicationModuleIdentifier::of("billing").unwrap(),
            ApplicationModuleIdentifier::of("inventory").unwrap(),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(names, vec!["billing", "inventory", "orders"]);
    }

    #[test]
    fn test_target_identifier_rejects_empty() {
        assert!(PublicationTargetIdentifier::of("").is_err());
    }

    #[test]
    fn test_target_identifier_equality_is_string_equality() {
        let a = PublicationTargetIdentifier::of("orders.OrderHandler.on").unwrap();
        let b = PublicationTargetIdentifier::of("orders.OrderHandler.on").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_plain_target() {
        let parsed = RoutingTarget::parse("target");
        assert_eq!(parsed.target(), Some("target"));
        assert_eq!(parsed.key(), None);
        let resolved = parsed.to_routing_target().unwrap();
        assert_eq!(resolved.target(), "target");
        assert_eq!(resolved.key(), None);
    }

    #[test]
    fn test_parse_trailing_separator_keeps_empty_key() {
        let parsed = RoutingTarget::parse("target::");
        assert_eq!(parsed.target(), Some("target"));
        assert_eq!(parsed.key(), Some(""));
        let resolved = parsed.to_routing_target().unwrap();
        assert_eq!(resolved.key(), Some(""));
    }

    #[test]
    fn test_parse_target_and_key() {
        let resolved = RoutingTarget::parse("target::key").to_routing_target().unwrap();
        assert_eq!(resolved.target(), "target");
        assert_eq!(resolved.key(), Some("key"));
    }

    #[test]
    fn test_parse_trims_both_halves() {
        let resolved = RoutingTarget::parse("  target :: key  ")
            .to_routing_target()
            .unwrap();
        assert_eq!(resolved.target(), "target");
        assert_eq!(resolved.key(), Some("key"));
    }

    #[test]
    fn test_parse_blank_stays_unresolved() {
        for input in ["", "   "] {
            let parsed = RoutingTarget::parse(input);
            assert_eq!(parsed.target(), None);
            assert!(parsed.to_routing_target().is_err());
        }
    }

    #[test]
    fn test_parse_separator_only_stays_unresolved() {
        let parsed = RoutingTarget::parse("::key");
        assert_eq!(parsed.target(), None);
        assert!(parsed.to_routing_target().is_err());
    }

    #[test]
    fn test_round_trip_display() {
        for input in ["target", "target::", "target::key", "orders::#{payload.id}"] {
            let rendered = RoutingTarget::parse(input)
                .to_routing_target()
                .unwrap()
                .to_string();
            assert_eq!(rendered, input);
        }
    }

    #[test]
    fn test_builder() {
        let with_key = RoutingTarget::for_target("orders").and_key("7");
        assert_eq!(with_key.target(), "orders");
        assert_eq!(with_key.key(), Some("7"));

        let without_key = RoutingTarget::for_target("orders").without_key();
        assert_eq!(without_key.key(), None);
    }

    #[test]
    fn test_key_expression_detection() {
        let target = RoutingTarget::for_target("orders").and_key("#{payload.id}");
        assert!(target.has_key_expression());
        assert!(target.has_expression());

        let plain = RoutingTarget::for_target("orders").and_key("7");
        assert!(!plain.has_key_expression());
    }

    #[test]
    fn test_target_expression_detection() {
        let target = RoutingTarget::for_target("#{payload.region}").and_key("7");
        assert!(target.has_target_expression());
        assert!(target.has_expression());
    }

    #[test]
    fn test_equality_compares_both_halves() {
        let bare = RoutingTarget::for_target("t").without_key();
        let empty_key = RoutingTarget::for_target("t").and_key("");
        assert_ne!(bare, empty_key);
    }

    #[test]
    fn test_hash_collides_bare_target_with_empty_key() {
        // Deliberate hash-vs-equals choice: the hash covers the target
        // half only, so "t" and "t::" land in the same bucket.
        let bare = RoutingTarget::for_target("t").without_key();
        let empty_key = RoutingTarget::for_target("t").and_key("");
        assert_eq!(hash_of(&bare), hash_of(&empty_key));
        assert_ne!(bare, empty_key);
    }

    #[test]
    fn test_serde_transparency() {
        let id = ApplicationModuleIdentifier::of("orders").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"orders\"");
        let back: ApplicationModuleIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
