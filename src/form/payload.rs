use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;

use super::binding::FieldBinder;
use super::controller::{FormController, FormResult, SubmitEvent, SubmitOutcome};
use super::store::FormState;
use super::value::{FieldMap, ValidationError, ValidationResult};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormMeta<E> {
    pub valid: bool,
    pub submitted: bool,
    pub errors: ValidationResult<E>,
    pub is_validating: bool,
}

impl<E> FormMeta<E>
where
    E: Clone,
{
    pub fn from_state(state: &FormState<E>) -> Self {
        Self {
            valid: state.is_valid(),
            submitted: state.submitted,
            errors: state.errors(),
            is_validating: state.is_validating,
        }
    }
}

pub struct FormActions<E, P = ()>
where
    E: ValidationError,
{
    controller: FormController<E, P>,
}

impl<E, P> Clone for FormActions<E, P>
where
    E: ValidationError,
{
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

impl<E, P> FormActions<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    pub fn reset(&self) -> BoxFuture<'static, FormResult<FormState<E>>> {
        self.controller.reset()
    }

    pub fn submit(
        &self,
        event: Option<&mut dyn SubmitEvent>,
    ) -> BoxFuture<'static, FormResult<SubmitOutcome>> {
        self.controller.submit(event)
    }
}

pub struct FormAttributes<E, P = ()>
where
    E: ValidationError,
{
    pub name: String,
    actions: FormActions<E, P>,
}

impl<E, P> Clone for FormAttributes<E, P>
where
    E: ValidationError,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            actions: self.actions.clone(),
        }
    }
}

impl<E, P> FormAttributes<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    pub fn on_submit(
        &self,
        event: &mut dyn SubmitEvent,
    ) -> BoxFuture<'static, FormResult<SubmitOutcome>> {
        self.actions.submit(Some(event))
    }
}

pub struct FormPayload<E, P = ()>
where
    E: ValidationError,
{
    pub fields: FieldBinder<E, P>,
    pub values: FieldMap<E>,
    pub meta: FormMeta<E>,
    pub actions: FormActions<E, P>,
    pub form: FormAttributes<E, P>,
    pub props: P,
}

impl<E, P> Clone for FormPayload<E, P>
where
    E: ValidationError,
    P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            values: self.values.clone(),
            meta: self.meta.clone(),
            actions: self.actions.clone(),
            form: self.form.clone(),
            props: self.props.clone(),
        }
    }
}

/// Folds commits that land during a render into one follow-up pass.
#[derive(Default)]
pub(super) struct RenderGate {
    rendering: AtomicBool,
    pending: AtomicBool,
}

struct RenderingGuard<'a>(&'a RenderGate);

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        self.0.rendering.store(false, Ordering::Release);
    }
}

impl<E, P> FormController<E, P>
where
    E: ValidationError,
    P: Clone + Send + Sync + 'static,
{
    pub fn payload(&self) -> FormResult<FormPayload<E, P>> {
        let state = self.state()?;
        let actions = FormActions {
            controller: self.clone(),
        };
        Ok(FormPayload {
            fields: self.binder(),
            meta: FormMeta::from_state(&state),
            values: state.fields,
            form: FormAttributes {
                name: self.inner.name.clone(),
                actions: actions.clone(),
            },
            actions,
            props: self.inner.render_props.clone(),
        })
    }

    /// Hands a fresh payload to the render callback. A call made while a render is
    /// already running schedules one more pass instead of nesting.
    pub fn render(&self) -> FormResult<()> {
        let Some(render) = &self.inner.render else {
            return Ok(());
        };
        let gate = &self.inner.render_gate;
        loop {
            if gate.rendering.swap(true, Ordering::AcqRel) {
                gate.pending.store(true, Ordering::Release);
                return Ok(());
            }
            {
                let _guard = RenderingGuard(gate);
                loop {
                    gate.pending.store(false, Ordering::Release);
                    render(self.payload()?);
                    if !gate.pending.load(Ordering::Acquire) {
                        break;
                    }
                }
            }
            if !gate.pending.load(Ordering::Acquire) {
                return Ok(());
            }
        }
    }
}
