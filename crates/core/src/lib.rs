pub mod clock;
pub mod domain;
pub mod error;
pub mod services;
pub mod types;
