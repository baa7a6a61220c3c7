use std::fmt::Display;
use std::time::Duration;

use rand::Rng;

/// Error taxonomy for sync failures. Classification is by case-insensitive
/// substring match on the error message, since failures arrive from several
/// layers (HTTP client, Salesforce REST bodies, SQLite) with no shared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    RateLimit,
    Network,
    Database,
    Validation,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn classify(message: &str) -> ErrorKind {
        let m = message.to_ascii_lowercase();
        // Order matters: "invalid_grant" must hit Authentication, not
        // Validation, and "connection timed out" should read as Timeout.
        if m.contains("timed out") || m.contains("timeout") {
            ErrorKind::Timeout
        } else if m.contains("invalid_grant")
            || m.contains("authentication")
            || m.contains("unauthorized")
            || m.contains("invalid session")
            || m.contains("401")
        {
            ErrorKind::Authentication
        } else if m.contains("rate limit")
            || m.contains("request_limit")
            || m.contains("too many requests")
        {
            ErrorKind::RateLimit
        } else if m.contains("network")
            || m.contains("connection")
            || m.contains("dns")
            || m.contains("unreachable")
        {
            ErrorKind::Network
        } else if m.contains("database") || m.contains("sqlite") || m.contains("constraint") {
            ErrorKind::Database
        } else if m.contains("validation") || m.contains("invalid") {
            ErrorKind::Validation
        } else {
            ErrorKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Only transient kinds are worth retrying; everything else propagates
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout
        )
    }

    /// Base backoff delay before jitter/doubling. Rate limits back off the
    /// longest; plain timeouts the shortest.
    pub fn base_delay(&self) -> Duration {
        match self {
            ErrorKind::RateLimit => Duration::from_secs(60),
            ErrorKind::Network => Duration::from_secs(30),
            ErrorKind::Timeout => Duration::from_secs(15),
            _ => Duration::from_secs(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fractional jitter applied to each delay (0.2 = ±20%).
    pub jitter: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            jitter: 0.2,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay for a given retryable kind and zero-based attempt number:
    /// base * 2^attempt, ±jitter, floored at `min_delay`.
    pub fn delay_for(&self, kind: ErrorKind, attempt: u32) -> Duration {
        let base = kind.base_delay().as_secs_f64() * 2f64.powi(attempt as i32);
        let spread = base * self.jitter;
        let jittered = if spread > 0.0 {
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };
        let clamped = jittered
            .max(self.min_delay.as_secs_f64())
            .min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

/// Run `op`, retrying transient failures per the policy with a synchronous
/// sleep between attempts. Non-retryable errors propagate immediately; the
/// last error is returned once attempts are exhausted.
pub fn with_retry<T, E: Display>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = ErrorKind::classify(&e.to_string());
                if !kind.is_retryable() || attempt + 1 >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.delay_for(kind, attempt);
                tracing::warn!(
                    error = %e,
                    kind = kind.as_str(),
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs_f64(),
                    "transient failure, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
