pub mod auth;
pub mod newsletter;
