pub mod bands;
pub mod evoked;
