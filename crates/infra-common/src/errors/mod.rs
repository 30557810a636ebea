/*!
Error Handling

Common error type shared by the infrastructure components, plus
context helpers to attach component/operation information to errors.
*/

pub mod context;
pub mod types;

pub use context::{ErrorContext, ErrorExt};
pub use types::{Error, Result};
