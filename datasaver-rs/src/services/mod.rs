pub mod alert;
pub mod scheduler;
