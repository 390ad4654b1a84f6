//! Deterministic key construction.
//!
//! Every stored key is assembled from validated components joined by the
//! reserved separator `:`. Identical inputs always produce identical key
//! strings, and no two distinct (tenant, kind, identifier) tuples can
//! collide because the separator is forbidden inside components.
//!
//! # Key formats
//!
//! - Records: `<namespace>:<kind>:<tenant>:<identifier>[:<field>]`
//! - Triggers: `<trigger-namespace>:<action>:<identifier>` where the trigger
//!   namespace carries the tenant as `exp.<tenant>` — the whole informational
//!   payload of a trigger lives in its key, because the expiry notification
//!   carries only the key name.

use crate::error::ConfigError;

/// The reserved separator joining key components.
pub const KEY_SEPARATOR: char = ':';

/// Default namespace for record keys.
pub const DEFAULT_NAMESPACE: &str = "ember";

/// Leading tag of the trigger namespace segment.
pub const TRIGGER_TAG: &str = "exp";

/// Validate a single key component: non-empty and free of the separator.
pub fn check_component(component: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue {
            what: component,
            reason: "must not be empty".to_string(),
        });
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(ConfigError::ReservedSeparator {
            component,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Pure, stateless builder for record keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFactory {
    namespace: String,
}

impl Default for KeyFactory {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl KeyFactory {
    /// Create a factory with a custom namespace.
    pub fn new(namespace: impl Into<String>) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        check_component("namespace", &namespace)?;
        Ok(Self { namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build a record key: `<namespace>:<kind>:<tenant>:<identifier>`.
    pub fn record(
        &self,
        kind: &'static str,
        tenant: &str,
        identifier: &str,
    ) -> Result<String, ConfigError> {
        check_component("kind", kind)?;
        check_component("tenant", tenant)?;
        check_component("identifier", identifier)?;
        Ok(format!(
            "{ns}:{kind}:{tenant}:{identifier}",
            ns = self.namespace
        ))
    }

    /// Build a field-qualified record key:
    /// `<namespace>:<kind>:<tenant>:<identifier>:<field>`.
    pub fn record_field(
        &self,
        kind: &'static str,
        tenant: &str,
        identifier: &str,
        field: &str,
    ) -> Result<String, ConfigError> {
        check_component("field", field)?;
        Ok(format!("{}:{field}", self.record(kind, tenant, identifier)?))
    }

    /// Glob pattern matching every record of a kind under a tenant.
    pub fn record_pattern(&self, kind: &'static str, tenant: &str) -> Result<String, ConfigError> {
        check_component("kind", kind)?;
        check_component("tenant", tenant)?;
        Ok(format!("{ns}:{kind}:{tenant}:*", ns = self.namespace))
    }
}

/// A parsed or to-be-built trigger key.
///
/// The marker's entire payload is the key string itself; the stored value is
/// irrelevant and may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerKey {
    tenant: String,
    action: String,
    identifier: String,
}

impl TriggerKey {
    pub fn new(
        tenant: impl Into<String>,
        action: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let tenant = tenant.into();
        let action = action.into();
        let identifier = identifier.into();
        check_component("tenant", &tenant)?;
        check_component("action", &action)?;
        check_component("identifier", &identifier)?;
        Ok(Self {
            tenant,
            action,
            identifier,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Render the full key: `exp.<tenant>:<action>:<identifier>`.
    pub fn render(&self) -> String {
        format!(
            "{TRIGGER_TAG}.{}:{}:{}",
            self.tenant, self.action, self.identifier
        )
    }

    /// Glob pattern matching every trigger for an identifier under a tenant,
    /// regardless of action. Used for bulk cancellation.
    pub fn pattern_for_identifier(
        tenant: &str,
        identifier: &str,
    ) -> Result<String, ConfigError> {
        check_component("tenant", tenant)?;
        check_component("identifier", identifier)?;
        Ok(format!("{TRIGGER_TAG}.{tenant}:*:{identifier}"))
    }

    /// Parse an expired key back into its trigger components.
    ///
    /// Returns `None` for keys that do not match the trigger shape — other
    /// subsystems may share a pool with unrelated keys, and those must be
    /// ignored rather than rejected.
    pub fn parse(key: &str) -> Option<TriggerKey> {
        let mut parts = key.split(KEY_SEPARATOR);
        let namespace = parts.next()?;
        let action = parts.next()?;
        let identifier = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let tenant = namespace.strip_prefix(TRIGGER_TAG)?.strip_prefix('.')?;
        if tenant.is_empty() || action.is_empty() || identifier.is_empty() {
            return None;
        }
        Some(TriggerKey {
            tenant: tenant.to_string(),
            action: action.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_shape() {
        let keys = KeyFactory::default();
        let key = keys.record("state", "acme", "user42").expect("valid key");
        assert_eq!(key, "ember:state:acme:user42");
    }

    #[test]
    fn test_record_field_key_shape() {
        let keys = KeyFactory::default();
        let key = keys
            .record_field("state", "acme", "user42", "step")
            .expect("valid key");
        assert_eq!(key, "ember:state:acme:user42:step");
    }

    #[test]
    fn test_custom_namespace() {
        let keys = KeyFactory::new("shardA").expect("valid namespace");
        let key = keys.record("user", "t1", "u1").expect("valid key");
        assert_eq!(key, "shardA:user:t1:u1");
    }

    #[test]
    fn test_identical_inputs_identical_keys() {
        let keys = KeyFactory::default();
        let a = keys.record("state", "acme", "u1").expect("valid key");
        let b = keys.record("state", "acme", "u1").expect("valid key");
        assert_eq!(a, b);
    }

    #[test]
    fn test_separator_in_component_rejected() {
        let keys = KeyFactory::default();
        let err = keys.record("state", "a:b", "u1").expect_err("must fail");
        assert!(matches!(err, ConfigError::ReservedSeparator { component: "tenant", .. }));

        let err = keys.record("state", "acme", "x:y").expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::ReservedSeparator {
                component: "identifier",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_component_rejected() {
        let keys = KeyFactory::default();
        let err = keys.record("state", "", "u1").expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidValue { what: "tenant", .. }));
    }

    #[test]
    fn test_trigger_key_roundtrip() {
        let trigger = TriggerKey::new("acme", "payment_reminder", "TXN_12345").expect("valid");
        let rendered = trigger.render();
        assert_eq!(rendered, "exp.acme:payment_reminder:TXN_12345");

        let parsed = TriggerKey::parse(&rendered).expect("parses back");
        assert_eq!(parsed, trigger);
        assert_eq!(parsed.tenant(), "acme");
        assert_eq!(parsed.action(), "payment_reminder");
        assert_eq!(parsed.identifier(), "TXN_12345");
    }

    #[test]
    fn test_parse_rejects_non_trigger_keys() {
        assert!(TriggerKey::parse("ember:state:acme:u1").is_none());
        assert!(TriggerKey::parse("exp.acme:only_two").is_none());
        assert!(TriggerKey::parse("exp.acme:a:b:c").is_none());
        assert!(TriggerKey::parse("expiry.acme:a:b").is_none());
        assert!(TriggerKey::parse("exp.:a:b").is_none());
        assert!(TriggerKey::parse("").is_none());
    }

    #[test]
    fn test_identifier_with_dots_survives() {
        // Only ':' is reserved; identifiers may contain dots.
        let trigger = TriggerKey::new("acme", "timeout", "session.42").expect("valid");
        let parsed = TriggerKey::parse(&trigger.render()).expect("parses back");
        assert_eq!(parsed.identifier(), "session.42");
    }

    #[test]
    fn test_pattern_for_identifier() {
        let pattern = TriggerKey::pattern_for_identifier("acme", "TXN_1").expect("valid");
        assert_eq!(pattern, "exp.acme:*:TXN_1");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    /// Strategy for valid key components (no separator, non-empty).
    fn component_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.-]{1,24}"
    }

    proptest! {
        /// Property: record keys are injective over their components.
        #[test]
        fn prop_record_keys_injective(
            tenant1 in component_strategy(),
            tenant2 in component_strategy(),
            id1 in component_strategy(),
            id2 in component_strategy(),
        ) {
            let keys = KeyFactory::default();
            let a = keys.record("state", &tenant1, &id1).expect("valid key");
            let b = keys.record("state", &tenant2, &id2).expect("valid key");
            if (tenant1.clone(), id1.clone()) == (tenant2.clone(), id2.clone()) {
                prop_assert_eq!(a, b);
            } else {
                prop_assert_ne!(a, b, "distinct components must yield distinct keys");
            }
        }

        /// Property: trigger keys parse back to their components.
        #[test]
        fn prop_trigger_roundtrip(
            tenant in component_strategy(),
            action in component_strategy(),
            identifier in component_strategy(),
        ) {
            let trigger = TriggerKey::new(&tenant, &action, &identifier).expect("valid trigger");
            let parsed = TriggerKey::parse(&trigger.render());
            prop_assert_eq!(parsed, Some(trigger));
        }

        /// Property: record keys never parse as trigger keys.
        #[test]
        fn prop_record_keys_are_not_triggers(
            tenant in component_strategy(),
            identifier in component_strategy(),
        ) {
            let keys = KeyFactory::default();
            let key = keys.record("state", &tenant, &identifier).expect("valid key");
            prop_assert!(TriggerKey::parse(&key).is_none());
        }
    }
}
