pub mod analytics;
pub mod attachments;
pub mod core;
pub mod records;
pub mod session;
pub mod students;
