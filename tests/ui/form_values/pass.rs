use calmform::form::{FieldMap, FieldRecord, FieldValidation, FormValues};
use rust_decimal::Decimal;

#[derive(Clone, Debug, PartialEq, calmform::form::FormValues)]
struct SignupForm {
    email: String,
    newsletter: bool,
    age: i64,
    budget: Decimal,
}

fn main() {
    let model = SignupForm {
        email: "a@calm.ui".to_string(),
        newsletter: true,
        age: 31,
        budget: Decimal::new(1250, 2),
    };
    let values = model.clone().into_values();
    assert_eq!(values.len(), 4);

    let fields: FieldMap<String> = values
        .into_iter()
        .map(|(key, value)| (key, FieldRecord::new(value, FieldValidation::valid())))
        .collect();
    assert_eq!(SignupForm::from_fields(&fields).expect("typed read"), model);
}
