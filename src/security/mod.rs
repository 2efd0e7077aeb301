pub mod signature;

pub use signature::{sign_fields, verify_signature};
