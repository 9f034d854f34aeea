pub mod comments;
pub mod email_content;
pub mod newsletter;
pub mod spam;
