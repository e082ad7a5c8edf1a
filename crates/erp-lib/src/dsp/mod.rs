pub mod filters;
pub mod ica;
