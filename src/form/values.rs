use std::collections::BTreeMap;

use super::controller::{FormError, FormResult};
use super::value::{FieldKey, FieldMap, FieldValue, FromFieldValue};

/// A typed view over a form's values, usually derived with `#[derive(FormValues)]`.
pub trait FormValues: Sized {
    fn into_values(self) -> BTreeMap<FieldKey, FieldValue>;

    fn from_fields<E>(fields: &FieldMap<E>) -> FormResult<Self>;
}

impl FormValues for BTreeMap<FieldKey, FieldValue> {
    fn into_values(self) -> BTreeMap<FieldKey, FieldValue> {
        self
    }

    fn from_fields<E>(fields: &FieldMap<E>) -> FormResult<Self> {
        Ok(fields
            .iter()
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect())
    }
}

pub fn read_field<T, E>(fields: &FieldMap<E>, key: &str) -> FormResult<T>
where
    T: FromFieldValue,
{
    let record = fields
        .get(key)
        .ok_or_else(|| FormError::MissingField(FieldKey::from(key)))?;
    T::from_field_value(&record.value).ok_or_else(|| FormError::FieldType {
        field: FieldKey::from(key),
        expected: T::EXPECTED,
    })
}
