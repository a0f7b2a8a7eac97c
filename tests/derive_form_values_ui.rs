#[test]
fn form_values_derive_ui() {
    let testcases = trybuild::TestCases::new();
    testcases.pass("tests/ui/form_values/pass.rs");
    testcases.pass("tests/ui/form_values/pass_seeds_form.rs");
}
