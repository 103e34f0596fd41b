//! Application-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// Consecutive rate-limited attempts after which a session stops calling
/// the completion endpoint.
pub const THROTTLE_THRESHOLD: u32 = 3;

/// Detail carried by the synthetic error returned for a throttled session.
pub const THROTTLED_DETAIL: &str = "throttled";

/// Sampling temperature for reply drafting.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Upper bound on generated reply length, in tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Per-request timeout for the completion endpoint in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Spacing between completion requests in seconds.
/// Three requests per minute is the tightest free-tier limit observed.
pub const DEFAULT_MIN_REQUEST_INTERVAL_SECS: u64 = 20;

/// SMTP relay used when neither config nor secrets name one.
pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";

/// STARTTLS submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Retries for SMTP connection failures before giving up.
pub const SMTP_SEND_RETRIES: u32 = 2;
