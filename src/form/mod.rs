mod binding;
mod controller;
mod payload;
mod store;
mod validation;
mod value;
mod values;


pub use binding::{FieldBinder, FieldHandle};
pub use calmform_derive::FormValues;
pub use controller::{
    FieldsCallback, FormController, FormError, FormOptions, FormResult, RenderFn, SubmitEvent,
    SubmitOutcome, SubmitPolicy, ValidationTicket, is_form_valid, validation_errors,
};
pub use payload::{FormActions, FormAttributes, FormMeta, FormPayload};
pub use store::{
    FormPhase, FormState, LocalStore, StateContainer, StateObserver, StatePatch, SubscriptionId,
};
pub use validation::{
    AsyncFieldValidator, BoxedValidationFuture, FieldValidator, ValidationDispatcher,
    ValidatorFailure, ValidatorResult, Validators,
};
pub use value::{
    FieldKey, FieldMap, FieldMeta, FieldRecord, FieldValidation, FieldValue, FromFieldValue,
    ValidationError, ValidationResult,
};
pub use values::{FormValues, read_field};
