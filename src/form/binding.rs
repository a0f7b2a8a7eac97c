use futures::FutureExt;
use futures::future::{self, BoxFuture};

use super::controller::{FormController, FormError, FormResult};
use super::value::{FieldKey, FieldRecord, FieldValue, ValidationError};

pub struct FieldBinder<E, P = ()>
where
    E: ValidationError,
{
    controller: FormController<E, P>,
    generation: u64,
}

impl<E, P> Clone for FieldBinder<E, P>
where
    E: ValidationError,
{
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            generation: self.generation,
        }
    }
}

impl<E, P> FieldBinder<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    pub(super) fn new(controller: FormController<E, P>, generation: u64) -> Self {
        Self {
            controller,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn field(&self, key: impl Into<FieldKey>) -> FieldHandle<E, P> {
        FieldHandle {
            controller: self.controller.clone(),
            key: key.into(),
            generation: self.generation,
        }
    }
}

pub struct FieldHandle<E, P = ()>
where
    E: ValidationError,
{
    controller: FormController<E, P>,
    key: FieldKey,
    generation: u64,
}

impl<E, P> Clone for FieldHandle<E, P>
where
    E: ValidationError,
{
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            key: self.key.clone(),
            generation: self.generation,
        }
    }
}

impl<E, P> FieldHandle<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn is_current(&self) -> bool {
        self.controller.generation() == self.generation
    }

    pub fn initial_value(&self) -> FieldValue {
        self.controller.initial_value(self.key.as_str())
    }

    pub fn record(&self) -> FormResult<Option<FieldRecord<E>>> {
        self.controller
            .select(|state| state.fields.get(self.key.as_str()).cloned())
    }

    pub fn value(&self) -> FormResult<FieldValue> {
        Ok(self
            .record()?
            .map(|record| record.value)
            .unwrap_or_else(|| self.initial_value()))
    }

    pub fn mount(&self) -> BoxFuture<'static, FormResult<FieldRecord<E>>> {
        if let Err(error) = self.ensure_current() {
            return future::ready(Err(error)).boxed();
        }
        match self.record() {
            Ok(Some(record)) => future::ready(Ok(record)).boxed(),
            Ok(None) => self
                .controller
                .update_field(self.key.clone(), self.initial_value()),
            Err(error) => future::ready(Err(error)).boxed(),
        }
    }

    pub fn change(
        &self,
        value: impl Into<FieldValue>,
    ) -> BoxFuture<'static, FormResult<FieldRecord<E>>> {
        if let Err(error) = self.ensure_current() {
            return future::ready(Err(error)).boxed();
        }
        self.controller.update_field(self.key.clone(), value)
    }

    fn ensure_current(&self) -> FormResult<()> {
        if self.is_current() {
            return Ok(());
        }
        Err(FormError::StaleBinding {
            field: self.key.clone(),
            generation: self.generation,
        })
    }
}
