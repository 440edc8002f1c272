pub mod commands;

pub use commands::{commands_router, AppState};
