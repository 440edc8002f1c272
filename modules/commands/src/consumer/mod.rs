pub mod command_consumer;
pub mod redelivery;
pub mod reply_consumer;

pub use command_consumer::start_command_consumers;
pub use reply_consumer::start_reply_consumer;
