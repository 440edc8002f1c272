//! Header names and message types carried on every command, reply, and
//! event message.

/// Stable message identity; equals the outbox row id so a republished row
/// dedups in the inbox.
pub const HEADER_MESSAGE_ID: &str = "message-id";

/// Identity of the originating command
pub const HEADER_COMMAND_ID: &str = "command-id";

/// Command kind, used to route to the registered handler
pub const HEADER_COMMAND_NAME: &str = "command-name";

/// Business key of the originating command
pub const HEADER_BUSINESS_KEY: &str = "business-key";

/// Semantic message type (one of the MSG_* constants)
pub const HEADER_MESSAGE_TYPE: &str = "type";

/// Outbound request for a command execution
pub const MSG_COMMAND_REQUESTED: &str = "CommandRequested";

/// A command reached SUCCEEDED; payload is the handler result
pub const MSG_COMMAND_COMPLETED: &str = "CommandCompleted";

/// A command reached FAILED; payload carries `{"error": msg}`
pub const MSG_COMMAND_FAILED: &str = "CommandFailed";
