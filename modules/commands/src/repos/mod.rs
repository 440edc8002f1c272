pub mod command_repo;
pub mod dlq_repo;
pub mod inbox_repo;
pub mod outbox_repo;
