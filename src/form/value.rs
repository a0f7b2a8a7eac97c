use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(value: &FieldKey) -> Self {
        value.clone()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Number(Decimal),
}

impl FieldValue {
    /// Converts a float into a number value. Non-finite inputs have no decimal form.
    pub fn from_f64(value: f64) -> Option<Self> {
        decimal_from_f64(value).map(Self::Number)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Text(text) if text.is_empty())
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(Decimal::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(Decimal::from(value))
    }
}

pub trait ValidationError: Clone + Send + Sync + 'static {
    fn message(&self) -> String;
}

impl ValidationError for String {
    fn message(&self) -> String {
        self.clone()
    }
}

impl ValidationError for &'static str {
    fn message(&self) -> String {
        (*self).to_owned()
    }
}

/// Outcome of validating one value. A field is valid exactly when it carries no error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldValidation<E> {
    error: Option<E>,
}

impl<E> FieldValidation<E> {
    pub const fn valid() -> Self {
        Self { error: None }
    }

    pub const fn invalid(error: E) -> Self {
        Self { error: Some(error) }
    }

    pub const fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    pub const fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }
}

impl<E> Default for FieldValidation<E> {
    fn default() -> Self {
        Self::valid()
    }
}

impl<E> From<Result<(), E>> for FieldValidation<E> {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::valid(),
            Err(error) => Self::invalid(error),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldMeta<E> {
    pub validation: FieldValidation<E>,
}

impl<E> Default for FieldMeta<E> {
    fn default() -> Self {
        Self {
            validation: FieldValidation::valid(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldRecord<E> {
    pub value: FieldValue,
    pub meta: FieldMeta<E>,
}

impl<E> FieldRecord<E> {
    pub fn new(value: FieldValue, validation: FieldValidation<E>) -> Self {
        Self {
            value,
            meta: FieldMeta { validation },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.meta.validation.is_valid()
    }
}

pub type FieldMap<E> = BTreeMap<FieldKey, FieldRecord<E>>;

pub type ValidationResult<E> = BTreeMap<FieldKey, FieldMeta<E>>;

pub trait FromFieldValue: Sized {
    const EXPECTED: &'static str;

    fn from_field_value(value: &FieldValue) -> Option<Self>;
}

impl FromFieldValue for String {
    const EXPECTED: &'static str = "text";

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_text().map(str::to_owned)
    }
}

impl FromFieldValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromFieldValue for Decimal {
    const EXPECTED: &'static str = "number";

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_number()
    }
}

impl FromFieldValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value
            .as_number()
            .filter(|number| number.fract().is_zero())
            .and_then(|number| number.to_i64())
    }
}

fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&format!("{value:.18}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_value_is_empty_text() {
        assert!(FieldValue::default().is_empty_text());
    }

    #[test]
    fn float_conversion_rejects_non_finite() {
        assert!(FieldValue::from_f64(f64::NAN).is_none());
        assert_eq!(
            FieldValue::from_f64(1.5).and_then(|value| value.as_number()),
            Some(Decimal::new(15, 1))
        );
    }

    #[test]
    fn integer_read_requires_whole_number() {
        assert_eq!(i64::from_field_value(&FieldValue::from(42)), Some(42));
        let fractional = FieldValue::Number(Decimal::new(425, 1));
        assert_eq!(i64::from_field_value(&fractional), None);
    }

    #[test]
    fn keys_look_up_by_str() {
        let mut map = BTreeMap::new();
        map.insert(FieldKey::from("email"), 1);
        assert_eq!(map.get("email"), Some(&1));
    }
}
