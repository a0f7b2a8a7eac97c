use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;

use super::binding::FieldBinder;
use super::payload::{FormPayload, RenderGate};
use super::store::{
    FormPhase, FormState, LocalStore, StateContainer, StatePatch, SubscriptionId,
};
use super::validation::{ValidationDispatcher, Validators};
use super::value::{
    FieldKey, FieldMap, FieldRecord, FieldValidation, FieldValue, ValidationError,
    ValidationResult,
};
use super::values::FormValues;
use crate::id::stable_auto_id;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    ValidatorFailed { field: FieldKey, message: String },
    StaleBinding { field: FieldKey, generation: u64 },
    MissingField(FieldKey),
    FieldType { field: FieldKey, expected: &'static str },
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::ValidatorFailed { field, message } => {
                write!(f, "validator for field `{field}` failed: {message}")
            }
            FormError::StaleBinding { field, generation } => write!(
                f,
                "field `{field}` is bound to generation {generation}, which was replaced by a reset"
            ),
            FormError::MissingField(field) => write!(f, "field `{field}` is not registered"),
            FormError::FieldType { field, expected } => {
                write!(f, "field `{field}` does not hold a {expected} value")
            }
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub type FieldsCallback<E> = Arc<dyn Fn(&FieldMap<E>) + Send + Sync>;
pub type RenderFn<E, P> = Arc<dyn Fn(FormPayload<E, P>) + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SubmitPolicy {
    #[default]
    UseSnapshot,
    AwaitValidation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Submitted,
    Rejected,
}

pub trait SubmitEvent {
    fn prevent_default(&mut self);
}

pub struct FormOptions<E, P = ()>
where
    E: ValidationError,
{
    pub(super) name: String,
    pub(super) render: Option<RenderFn<E, P>>,
    pub(super) validators: Option<Validators<E>>,
    pub(super) initial_values: BTreeMap<FieldKey, FieldValue>,
    pub(super) on_submit: Option<FieldsCallback<E>>,
    pub(super) on_submit_failed: Option<FieldsCallback<E>>,
    pub(super) on_change: Option<FieldsCallback<E>>,
    pub(super) render_props: P,
    pub(super) store: Option<Arc<dyn StateContainer<E>>>,
    pub(super) submit_policy: SubmitPolicy,
}

impl<E> FormOptions<E, ()>
where
    E: ValidationError,
{
    #[track_caller]
    pub fn new() -> Self {
        Self::with_render_props(())
    }
}

impl<E> Default for FormOptions<E, ()>
where
    E: ValidationError,
{
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl<E, P> FormOptions<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    #[track_caller]
    pub fn with_render_props(props: P) -> Self {
        Self {
            name: stable_auto_id("form"),
            render: None,
            validators: None,
            initial_values: BTreeMap::new(),
            on_submit: None,
            on_submit_failed: None,
            on_change: None,
            render_props: props,
            store: None,
            submit_policy: SubmitPolicy::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn render(mut self, render: impl Fn(FormPayload<E, P>) + Send + Sync + 'static) -> Self {
        self.render = Some(Arc::new(render));
        self
    }

    pub fn validators(mut self, validators: Validators<E>) -> Self {
        self.validators = Some(validators);
        self
    }

    pub fn initial_value(mut self, key: impl Into<FieldKey>, value: impl Into<FieldValue>) -> Self {
        self.initial_values.insert(key.into(), value.into());
        self
    }

    pub fn initial_values<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<FieldKey>,
        V: Into<FieldValue>,
    {
        self.initial_values.extend(
            values
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        self
    }

    pub fn initial_model<M>(self, model: M) -> Self
    where
        M: FormValues,
    {
        self.initial_values(model.into_values())
    }

    pub fn on_submit(mut self, callback: impl Fn(&FieldMap<E>) + Send + Sync + 'static) -> Self {
        self.on_submit = Some(Arc::new(callback));
        self
    }

    pub fn on_submit_failed(
        mut self,
        callback: impl Fn(&FieldMap<E>) + Send + Sync + 'static,
    ) -> Self {
        self.on_submit_failed = Some(Arc::new(callback));
        self
    }

    pub fn on_change(mut self, callback: impl Fn(&FieldMap<E>) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn store(mut self, store: Arc<dyn StateContainer<E>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.submit_policy = policy;
        self
    }
}

pub(super) struct FormInner<E, P>
where
    E: ValidationError,
{
    pub(super) name: String,
    pub(super) render: Option<RenderFn<E, P>>,
    pub(super) initial_values: BTreeMap<FieldKey, FieldValue>,
    pub(super) on_submit: Option<FieldsCallback<E>>,
    pub(super) on_submit_failed: Option<FieldsCallback<E>>,
    pub(super) on_change: Option<FieldsCallback<E>>,
    pub(super) render_props: P,
    pub(super) store: Arc<dyn StateContainer<E>>,
    pub(super) dispatcher: ValidationDispatcher<E>,
    pub(super) submit_policy: SubmitPolicy,
    pub(super) next_ticket: AtomicU64,
    pub(super) generation: AtomicU64,
    pub(super) render_gate: RenderGate,
    subscription: Option<SubscriptionId>,
}

impl<E, P> Drop for FormInner<E, P>
where
    E: ValidationError,
{
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            let _ = self.store.unsubscribe(id);
        }
    }
}

pub struct FormController<E, P = ()>
where
    E: ValidationError,
{
    pub(super) inner: Arc<FormInner<E, P>>,
}

impl<E, P> Clone for FormController<E, P>
where
    E: ValidationError,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E, P> FormController<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    pub fn new(options: FormOptions<E, P>) -> FormResult<Self> {
        let FormOptions {
            name,
            render,
            validators,
            initial_values,
            on_submit,
            on_submit_failed,
            on_change,
            render_props,
            store,
            submit_policy,
        } = options;
        let store = store.unwrap_or_else(|| Arc::new(LocalStore::<E>::new()));
        let dispatcher = ValidationDispatcher::new(validators, store.clone());

        let mut subscribe_error = None;
        let inner = Arc::new_cyclic(|weak: &Weak<FormInner<E, P>>| {
            let subscription = if render.is_some() {
                let weak = weak.clone();
                match store.subscribe(Arc::new(move |_state: &FormState<E>| {
                    if let Some(inner) = weak.upgrade() {
                        let controller = FormController { inner };
                        if let Err(error) = controller.render() {
                            tracing::warn!(%error, "render after state commit failed");
                        }
                    }
                })) {
                    Ok(id) => Some(id),
                    Err(error) => {
                        subscribe_error = Some(error);
                        None
                    }
                }
            } else {
                None
            };

            FormInner {
                name,
                render,
                initial_values,
                on_submit,
                on_submit_failed,
                on_change,
                render_props,
                store: store.clone(),
                dispatcher,
                submit_policy,
                next_ticket: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                render_gate: RenderGate::default(),
                subscription,
            }
        });
        if let Some(error) = subscribe_error {
            return Err(error);
        }
        tracing::debug!(form = %inner.name, "form created");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn render_props(&self) -> &P {
        &self.inner.render_props
    }

    pub fn store(&self) -> &Arc<dyn StateContainer<E>> {
        &self.inner.store
    }

    pub fn state(&self) -> FormResult<FormState<E>> {
        self.inner.store.get()
    }

    pub fn select<R>(&self, selector: impl FnOnce(&FormState<E>) -> R) -> FormResult<R> {
        self.inner.store.select(selector)
    }

    pub fn fields(&self) -> FormResult<FieldMap<E>> {
        self.select(|state| state.fields.clone())
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        self.select(FormState::is_valid)
    }

    pub fn errors(&self) -> FormResult<ValidationResult<E>> {
        self.select(FormState::errors)
    }

    pub fn phase(&self) -> FormResult<FormPhase> {
        self.select(FormState::phase)
    }

    pub fn initial_value(&self, key: &str) -> FieldValue {
        self.inner
            .initial_values
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn binder(&self) -> FieldBinder<E, P> {
        FieldBinder::new(self.clone(), self.generation())
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn validations_in_flight(&self) -> FormResult<usize> {
        self.inner.dispatcher.in_flight()
    }

    pub fn validate(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> BoxFuture<'static, FormResult<FieldValidation<E>>> {
        self.inner.dispatcher.validate(&key.into(), value.into())
    }

    /// Resolves with the record held for the field once this update settled. That is
    /// the newer record when a later update was issued meanwhile.
    pub fn update_field(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> BoxFuture<'static, FormResult<FieldRecord<E>>> {
        let key = key.into();
        let value = value.into();
        // Issued at call time, so the latest call wins regardless of poll order.
        let ticket = ValidationTicket(self.inner.next_ticket.fetch_add(1, Ordering::SeqCst));
        drop(
            self.inner
                .store
                .set(StatePatch::new().issue_ticket(key.clone(), ticket)),
        );
        let controller = self.clone();
        async move { controller.apply_field_update(key, value, ticket).await }.boxed()
    }

    async fn apply_field_update(
        &self,
        key: FieldKey,
        value: FieldValue,
        ticket: ValidationTicket,
    ) -> FormResult<FieldRecord<E>> {
        // Held until the record is committed, so `is_validating` never drops early.
        let tracking = self.inner.dispatcher.track()?;
        let validation = self.inner.dispatcher.validate(&key, value.clone()).await?;
        let record = FieldRecord::new(value, validation);
        let state = self
            .inner
            .store
            .set(StatePatch::new().upsert_field_for_ticket(key.clone(), record.clone(), ticket))
            .await?;
        drop(tracking);

        if state.latest_ticket(key.as_str()) != Some(ticket) {
            return Ok(state.fields.get(key.as_str()).cloned().unwrap_or(record));
        }
        if let Some(on_change) = &self.inner.on_change {
            on_change(&state.fields);
        }
        Ok(state.fields.get(key.as_str()).cloned().unwrap_or(record))
    }

    pub fn reset(&self) -> BoxFuture<'static, FormResult<FormState<E>>> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(form = %self.inner.name, generation, "form reset");
        // The render subscription picks up the reset commit.
        self.inner.store.set(StatePatch::reset())
    }

    pub fn submit(
        &self,
        event: Option<&mut dyn SubmitEvent>,
    ) -> BoxFuture<'static, FormResult<SubmitOutcome>> {
        if let Some(event) = event {
            event.prevent_default();
        }
        let controller = self.clone();
        async move { controller.run_submit().await }.boxed()
    }

    async fn run_submit(&self) -> FormResult<SubmitOutcome> {
        if self.inner.submit_policy == SubmitPolicy::AwaitValidation {
            self.inner.dispatcher.wait_idle().await?;
        }
        let state = self
            .inner
            .store
            .set(StatePatch::new().submitted(true))
            .await?;
        let valid = state.is_valid();
        tracing::debug!(
            form = %self.inner.name,
            valid,
            fields = state.fields.len(),
            "form submitted"
        );

        if valid {
            if let Some(on_submit) = &self.inner.on_submit {
                on_submit(&state.fields);
            }
            Ok(SubmitOutcome::Submitted)
        } else {
            if let Some(on_submit_failed) = &self.inner.on_submit_failed {
                on_submit_failed(&state.fields);
            }
            Ok(SubmitOutcome::Rejected)
        }
    }

    pub fn values<M>(&self) -> FormResult<M>
    where
        M: FormValues,
    {
        let fields = self.fields()?;
        M::from_fields(&fields)
    }
}

pub fn is_form_valid<E>(fields: &FieldMap<E>) -> bool {
    fields.values().all(FieldRecord::is_valid)
}

pub fn validation_errors<E>(fields: &FieldMap<E>) -> ValidationResult<E>
where
    E: Clone,
{
    fields
        .iter()
        .filter(|(_, record)| !record.is_valid())
        .map(|(key, record)| (key.clone(), record.meta.clone()))
        .collect()
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn lock<'a, T>(
    lock: &'a Mutex<T>,
    context: &'static str,
) -> FormResult<MutexGuard<'a, T>> {
    lock.lock().map_err(|_| FormError::StatePoisoned(context))
}
