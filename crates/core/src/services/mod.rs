pub mod dispatcher;
pub mod gatekeeper;
