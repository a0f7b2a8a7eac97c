pub mod form;
pub mod id;
pub mod prelude;

pub use form::{FormController, FormOptions};
