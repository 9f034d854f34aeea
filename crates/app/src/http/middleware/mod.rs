pub mod admin_auth;
pub mod client_meta;
