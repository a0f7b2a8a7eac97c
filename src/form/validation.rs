use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture};

use super::controller::{FormError, FormResult, lock};
use super::store::{StateContainer, StatePatch};
use super::value::{FieldKey, FieldValidation, FieldValue, ValidationError};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatorFailure(String);

impl ValidatorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl Display for ValidatorFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValidatorFailure {}

pub type ValidatorResult<E> = Result<FieldValidation<E>, ValidatorFailure>;

pub type BoxedValidationFuture<E> = BoxFuture<'static, ValidatorResult<E>>;

pub trait FieldValidator<E>: Send + Sync
where
    E: ValidationError,
{
    fn validate(&self, value: &FieldValue) -> Result<(), E>;
}

impl<E, F> FieldValidator<E> for F
where
    E: ValidationError,
    F: Fn(&FieldValue) -> Result<(), E> + Send + Sync,
{
    fn validate(&self, value: &FieldValue) -> Result<(), E> {
        (self)(value)
    }
}

pub trait AsyncFieldValidator<E>: Send + Sync
where
    E: ValidationError,
{
    fn validate(&self, value: FieldValue) -> BoxedValidationFuture<E>;
}

impl<E, F, Fut> AsyncFieldValidator<E> for F
where
    E: ValidationError,
    F: Fn(FieldValue) -> Fut + Send + Sync,
    Fut: Future<Output = ValidatorResult<E>> + Send + 'static,
{
    fn validate(&self, value: FieldValue) -> BoxedValidationFuture<E> {
        (self)(value).boxed()
    }
}

enum ValidatorEntry<E> {
    Sync(Arc<dyn FieldValidator<E>>),
    Async(Arc<dyn AsyncFieldValidator<E>>),
}

impl<E> Clone for ValidatorEntry<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(validator) => Self::Sync(validator.clone()),
            Self::Async(validator) => Self::Async(validator.clone()),
        }
    }
}

impl<E> ValidatorEntry<E>
where
    E: ValidationError,
{
    fn run(&self, value: FieldValue) -> BoxedValidationFuture<E> {
        match self {
            Self::Sync(validator) => {
                let verdict = FieldValidation::from(validator.validate(&value));
                future::ready(Ok(verdict)).boxed()
            }
            Self::Async(validator) => validator.validate(value),
        }
    }
}

pub struct Validators<E> {
    entries: BTreeMap<FieldKey, ValidatorEntry<E>>,
}

impl<E> Clone for Validators<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<E> Default for Validators<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<E> Validators<E>
where
    E: ValidationError,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<V>(mut self, key: impl Into<FieldKey>, validator: V) -> Self
    where
        V: FieldValidator<E> + 'static,
    {
        self.entries
            .insert(key.into(), ValidatorEntry::Sync(Arc::new(validator)));
        self
    }

    pub fn async_field<V>(mut self, key: impl Into<FieldKey>, validator: V) -> Self
    where
        V: AsyncFieldValidator<E> + 'static,
    {
        self.entries
            .insert(key.into(), ValidatorEntry::Async(Arc::new(validator)));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct InFlightState {
    count: usize,
    epoch: u64,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

struct InFlight<E>
where
    E: ValidationError,
{
    state: Mutex<InFlightState>,
    store: Arc<dyn StateContainer<E>>,
}

impl<E> InFlight<E>
where
    E: ValidationError,
{
    fn enter(self: &Arc<Self>) -> FormResult<InFlightGuard<E>> {
        let published = {
            let mut state = lock(&self.state, "entering validation")?;
            state.count += 1;
            (state.count == 1).then(|| {
                state.epoch += 1;
                state.epoch
            })
        };
        if let Some(epoch) = published {
            self.publish(true, epoch);
        }
        Ok(InFlightGuard {
            in_flight: self.clone(),
        })
    }

    fn leave(&self) {
        let published = {
            let Ok(mut state) = self.state.lock() else {
                tracing::warn!("validation counter poisoned, is_validating left as is");
                return;
            };
            state.count = state.count.saturating_sub(1);
            if state.count > 0 {
                None
            } else {
                for waiter in state.idle_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                state.epoch += 1;
                Some(state.epoch)
            }
        };
        if let Some(epoch) = published {
            self.publish(false, epoch);
        }
    }

    /// Writes the flag outside the counter lock, then rewrites it if another
    /// transition happened meanwhile. The last writer always saw the latest epoch.
    fn publish(&self, mut is_validating: bool, mut epoch: u64) {
        loop {
            drop(self.store.set(StatePatch::new().validating(is_validating)));
            let Ok(state) = self.state.lock() else {
                return;
            };
            if state.epoch == epoch {
                return;
            }
            is_validating = state.count > 0;
            epoch = state.epoch;
        }
    }

    fn idle(&self) -> FormResult<Option<oneshot::Receiver<()>>> {
        let mut state = lock(&self.state, "waiting for validations")?;
        if state.count == 0 {
            return Ok(None);
        }
        let (sender, receiver) = oneshot::channel();
        state.idle_waiters.push(sender);
        Ok(Some(receiver))
    }

    fn count(&self) -> FormResult<usize> {
        Ok(lock(&self.state, "reading validation count")?.count)
    }
}

/// Released on every exit path of a validation, including a dropped future.
pub(super) struct InFlightGuard<E>
where
    E: ValidationError,
{
    in_flight: Arc<InFlight<E>>,
}

impl<E> Drop for InFlightGuard<E>
where
    E: ValidationError,
{
    fn drop(&mut self) {
        self.in_flight.leave();
    }
}

pub struct ValidationDispatcher<E>
where
    E: ValidationError,
{
    validators: Option<Validators<E>>,
    in_flight: Arc<InFlight<E>>,
}

impl<E> Clone for ValidationDispatcher<E>
where
    E: ValidationError,
{
    fn clone(&self) -> Self {
        Self {
            validators: self.validators.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<E> ValidationDispatcher<E>
where
    E: ValidationError,
{
    pub fn new(validators: Option<Validators<E>>, store: Arc<dyn StateContainer<E>>) -> Self {
        Self {
            validators,
            in_flight: Arc::new(InFlight {
                state: Mutex::new(InFlightState {
                    count: 0,
                    epoch: 0,
                    idle_waiters: Vec::new(),
                }),
                store,
            }),
        }
    }

    /// Marks the form as validating right away, then resolves with the verdict for
    /// `value`. Fields without a validator are valid.
    pub fn validate(
        &self,
        key: &FieldKey,
        value: FieldValue,
    ) -> BoxFuture<'static, FormResult<FieldValidation<E>>> {
        let guard = match self.in_flight.enter() {
            Ok(guard) => guard,
            Err(error) => return future::ready(Err(error)).boxed(),
        };
        let pending = self
            .validators
            .as_ref()
            .and_then(|validators| validators.entries.get(key))
            .map(|entry| entry.run(value));
        let key = key.clone();
        tracing::debug!(field = %key, has_validator = pending.is_some(), "validation dispatched");

        async move {
            let result = match pending {
                Some(pending) => pending.await,
                None => Ok(FieldValidation::valid()),
            };
            drop(guard);
            match result {
                Ok(validation) => {
                    tracing::debug!(field = %key, valid = validation.is_valid(), "validation settled");
                    Ok(validation)
                }
                Err(failure) => {
                    tracing::warn!(field = %key, error = %failure, "validator failed");
                    Err(FormError::ValidatorFailed {
                        field: key,
                        message: failure.to_string(),
                    })
                }
            }
        }
        .boxed()
    }

    pub(super) fn track(&self) -> FormResult<InFlightGuard<E>> {
        self.in_flight.enter()
    }

    pub fn wait_idle(&self) -> BoxFuture<'static, FormResult<()>> {
        match self.in_flight.idle() {
            Ok(None) => future::ready(Ok(())).boxed(),
            Ok(Some(receiver)) => async move {
                // A dropped sender only happens with the dispatcher itself, nothing left to wait for.
                let _ = receiver.await;
                Ok(())
            }
            .boxed(),
            Err(error) => future::ready(Err(error)).boxed(),
        }
    }

    pub fn in_flight(&self) -> FormResult<usize> {
        self.in_flight.count()
    }
}
