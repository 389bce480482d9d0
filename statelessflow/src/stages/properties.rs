//! Property descriptors, validators and resolved property values.

use crate::errors::StageError;
use crate::registry::ServiceHandle;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Rule a property value must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum PropertyValidator {
    /// Any value, including the empty string.
    #[default]
    Any,
    /// Any value that is not blank.
    NonEmpty,
    /// An integer greater than zero.
    PositiveInteger,
    /// An integer of zero or more.
    NonNegativeInteger,
    /// `true` or `false`.
    Boolean,
    /// A valid regular expression.
    Regex,
    /// One of a fixed set of values.
    AllowedValues(Vec<String>),
}

impl PropertyValidator {
    /// Checks a value.
    ///
    /// # Errors
    ///
    /// Returns the reason the value is rejected.
    pub fn validate(&self, value: &str) -> Result<(), String> {
        match self {
            Self::Any => Ok(()),
            Self::NonEmpty => {
                if value.trim().is_empty() {
                    Err("value must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Self::PositiveInteger => match value.trim().parse::<u64>() {
                Ok(n) if n > 0 => Ok(()),
                _ => Err("value must be a positive integer".to_string()),
            },
            Self::NonNegativeInteger => value
                .trim()
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| "value must be a non-negative integer".to_string()),
            Self::Boolean => match value.trim() {
                "true" | "false" => Ok(()),
                _ => Err("value must be 'true' or 'false'".to_string()),
            },
            Self::Regex => Regex::new(value)
                .map(|_| ())
                .map_err(|e| format!("invalid regular expression: {e}")),
            Self::AllowedValues(allowed) => {
                if allowed.iter().any(|a| a == value) {
                    Ok(())
                } else {
                    Err(format!("value must be one of [{}]", allowed.join(", ")))
                }
            }
        }
    }
}

/// Describes one configurable property of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether a value (or default) must be present before the flow runs.
    #[serde(default)]
    pub required: bool,
    /// Value used when the property is never set.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Rule applied to set values.
    #[serde(default)]
    pub validator: PropertyValidator,
    /// Whether `${name}` references are substituted from the variable registry.
    #[serde(default)]
    pub supports_variables: bool,
    /// Whether the value names a service to resolve through the service lookup.
    #[serde(default)]
    pub identifies_service: bool,
}

impl PropertyDescriptor {
    /// Creates an optional, unvalidated property.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            default_value: None,
            validator: PropertyValidator::Any,
            supports_variables: false,
            identifies_service: false,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the property as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: PropertyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Enables `${name}` substitution.
    #[must_use]
    pub fn supports_variables(mut self) -> Self {
        self.supports_variables = true;
        self
    }

    /// Marks the value as a service name.
    #[must_use]
    pub fn identifies_service(mut self) -> Self {
        self.identifies_service = true;
        self
    }
}

/// Why a stage refused a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyRejection {
    /// The stage has no property by that name.
    Unknown,
    /// The value failed validation.
    Invalid(String),
}

/// A property value after variable substitution and service resolution.
#[derive(Debug, Clone)]
pub struct PropertyValue {
    /// The value as set by the caller.
    pub raw: String,
    /// The value after `${name}` substitution.
    pub resolved: String,
    /// The service the value names, for service properties.
    pub service: Option<ServiceHandle>,
}

/// The resolved configuration of one stage.
#[derive(Debug, Clone, Default)]
pub struct StageProperties {
    descriptors: Vec<PropertyDescriptor>,
    values: HashMap<String, PropertyValue>,
}

impl StageProperties {
    /// Creates an empty configuration over the given descriptors.
    #[must_use]
    pub fn new(descriptors: Vec<PropertyDescriptor>) -> Self {
        Self {
            descriptors,
            values: HashMap::new(),
        }
    }

    /// Returns the descriptor for `name`.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Returns every descriptor.
    #[must_use]
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    /// Stores a resolved value, replacing any earlier one.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        self.values.insert(name.into(), value)
    }

    /// Returns true if the property was explicitly set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns the resolved value, falling back to the descriptor default.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|v| v.resolved.as_str())
            .or_else(|| self.descriptor(name).and_then(|d| d.default_value.as_deref()))
    }

    /// Returns the value parsed as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not parse.
    pub fn get_parsed<T>(&self, name: &str) -> Result<Option<T>, StageError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    StageError::message(format!("property '{name}' value '{raw}' is invalid: {e}"))
                })
            })
            .transpose()
    }

    /// Returns the value, failing when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the property has neither a value nor a default.
    pub fn require(&self, name: &str) -> Result<&str, StageError> {
        self.get(name)
            .ok_or_else(|| StageError::message(format!("property '{name}' is not set")))
    }

    /// Returns the service a service property resolved to.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceHandle> {
        self.values.get(name).and_then(|v| v.service.as_ref())
    }

    /// Returns the names of required properties with neither a value nor a default.
    #[must_use]
    pub fn missing_required(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .filter(|d| d.required && self.get(&d.name).is_none())
            .map(|d| d.name.clone())
            .collect()
    }

    /// Iterates over explicitly set values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(v: &str) -> PropertyValue {
        PropertyValue {
            raw: v.to_string(),
            resolved: v.to_string(),
            service: None,
        }
    }

    #[test]
    fn test_validators() {
        assert!(PropertyValidator::Any.validate("").is_ok());
        assert!(PropertyValidator::NonEmpty.validate("  ").is_err());
        assert!(PropertyValidator::PositiveInteger.validate("1").is_ok());
        assert!(PropertyValidator::PositiveInteger.validate("0").is_err());
        assert!(PropertyValidator::PositiveInteger.validate("-3").is_err());
        assert!(PropertyValidator::NonNegativeInteger.validate("0").is_ok());
        assert!(PropertyValidator::Boolean.validate("true").is_ok());
        assert!(PropertyValidator::Boolean.validate("yes").is_err());
        assert!(PropertyValidator::Regex.validate("(?s)(^.*$)").is_ok());
        assert!(PropertyValidator::Regex.validate("(unclosed").is_err());
    }

    #[test]
    fn test_allowed_values() {
        let validator = PropertyValidator::AllowedValues(vec!["replace".into(), "fail".into()]);
        assert!(validator.validate("replace").is_ok());

        let err = validator.validate("ignore").unwrap_err();
        assert!(err.contains("replace, fail"));
    }

    #[test]
    fn test_get_falls_back_to_default() {
        let mut props = StageProperties::new(vec![
            PropertyDescriptor::new("count").with_default("1"),
            PropertyDescriptor::new("dir").required(),
        ]);

        assert_eq!(props.get("count"), Some("1"));
        assert_eq!(props.missing_required(), vec!["dir".to_string()]);

        props.insert("count", value("5"));
        props.insert("dir", value("/tmp"));
        assert_eq!(props.get_parsed::<usize>("count").unwrap(), Some(5));
        assert!(props.missing_required().is_empty());
        assert!(props.is_set("dir"));
    }

    #[test]
    fn test_get_parsed_error() {
        let mut props = StageProperties::new(vec![PropertyDescriptor::new("count")]);
        props.insert("count", value("many"));

        let err = props.get_parsed::<usize>("count").unwrap_err();
        assert!(err.to_string().contains("count"));
        assert!(props.require("absent").is_err());
    }

    #[test]
    fn test_descriptor_serialize() {
        let descriptor = PropertyDescriptor::new("Line Split Count")
            .required()
            .with_validator(PropertyValidator::PositiveInteger);

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["validator"]["type"], "positive_integer");
        assert_eq!(json["required"], true);
    }
}
