pub mod comments_repo;
pub mod migrations;
pub mod newsletter_repo;
pub mod pool;
pub mod posts_repo;

pub use comments_repo::*;
pub use migrations::run_migrations;
pub use newsletter_repo::*;
pub use pool::{connect_lazy, DbPool, DbPoolError};
pub use posts_repo::*;
