pub mod epochs;
pub mod session;
