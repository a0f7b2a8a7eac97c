use calmform::form::{FieldValue, FormController, FormOptions};

#[derive(calmform::form::FormValues)]
struct LoginForm {
    username: String,
    remember: bool,
}

fn main() {
    let options = FormOptions::<String>::new().initial_model(LoginForm {
        username: "calm".to_string(),
        remember: true,
    });
    let form = FormController::new(options).expect("form");
    assert_eq!(form.initial_value("username"), FieldValue::from("calm"));
    assert_eq!(form.initial_value("remember"), FieldValue::Bool(true));
    assert_eq!(form.initial_value("password"), FieldValue::from(""));
}
