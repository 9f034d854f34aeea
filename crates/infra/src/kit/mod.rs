pub mod client;

pub use client::{KitClient, KitCredentials};
