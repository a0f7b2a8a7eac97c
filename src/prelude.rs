pub use crate::form::{
    FieldBinder, FieldHandle, FieldKey, FieldMap, FieldRecord, FieldValidation, FieldValue,
    FormController, FormError, FormOptions, FormPayload, FormPhase, FormResult, FormState,
    FormValues, StateContainer, SubmitEvent, SubmitOutcome, SubmitPolicy, ValidationError,
    ValidatorFailure, Validators,
};
