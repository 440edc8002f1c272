pub mod command_bus;
pub mod executor;
pub mod fast_path;
pub mod handlers;
pub mod relay;
pub mod response_registry;
