use std::env;
use std::time::Duration;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: String,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub naming: Naming,
    /// Lease held while a command is RUNNING
    pub command_lease: Duration,
    /// Cap on the outbox reschedule delay
    pub max_backoff: Duration,
    /// Bounded HTTP wait on the response registry (zero = async only)
    pub sync_wait: Duration,
    /// Fixed delay between outbox sweeps
    pub sweep_interval: Duration,
    /// Maximum rows claimed per sweep
    pub sweep_batch_size: i64,
    /// Deliveries of one message before the consumer drops it
    pub consumer_max_attempts: u32,
    /// Cadence of the expired-lease reaper (zero = disabled)
    pub lease_reaper_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "inmemory".to_string());

        let nats_url =
            env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8093".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let naming = Naming::from_env();

        Ok(Config {
            database_url,
            bus_type,
            nats_url,
            host,
            port,
            naming,
            command_lease: duration_secs("COMMAND_LEASE_SECS", 30)?,
            max_backoff: duration_secs("MAX_BACKOFF_SECS", 300)?,
            sync_wait: duration_millis("SYNC_WAIT_MS", 2000)?,
            sweep_interval: duration_secs("SWEEP_INTERVAL_SECS", 30)?,
            sweep_batch_size: parse_var("SWEEP_BATCH_SIZE", 500)?,
            consumer_max_attempts: parse_var("CONSUMER_MAX_ATTEMPTS", 3)?,
            lease_reaper_interval: duration_secs("LEASE_REAPER_INTERVAL_SECS", 0)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

fn duration_secs(name: &str, default: u64) -> Result<Duration, String> {
    parse_var(name, default).map(Duration::from_secs)
}

fn duration_millis(name: &str, default: u64) -> Result<Duration, String> {
    parse_var(name, default).map(Duration::from_millis)
}

/// Queue and topic naming convention, applied on both the produce and the
/// consume side.
#[derive(Debug, Clone)]
pub struct Naming {
    pub command_prefix: String,
    pub queue_suffix: String,
    pub reply_queue: String,
    pub event_prefix: String,
}

impl Naming {
    pub fn from_env() -> Self {
        Self {
            command_prefix: env::var("COMMAND_PREFIX").unwrap_or_else(|_| "APP.CMD.".to_string()),
            queue_suffix: env::var("QUEUE_SUFFIX").unwrap_or_else(|_| ".Q".to_string()),
            reply_queue: env::var("REPLY_QUEUE").unwrap_or_else(|_| "APP.CMD.REPLY.Q".to_string()),
            event_prefix: env::var("EVENT_PREFIX").unwrap_or_else(|_| "events.".to_string()),
        }
    }

    /// Queue a command of the given name is requested on
    pub fn command_queue(&self, name: &str) -> String {
        format!("{}{}{}", self.command_prefix, name, self.queue_suffix)
    }

    /// Topic a command of the given name broadcasts its outcome on
    pub fn event_topic(&self, name: &str) -> String {
        format!("{}{}", self.event_prefix, name)
    }

    /// Default reply queue when the submitter names none
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            command_prefix: "APP.CMD.".to_string(),
            queue_suffix: ".Q".to_string(),
            reply_queue: "APP.CMD.REPLY.Q".to_string(),
            event_prefix: "events.".to_string(),
        }
    }
}
