mod http_error;
mod obfuscate_errors;

pub use http_error::*;
pub use obfuscate_errors::*;
