use sha2::{Digest, Sha256};

/// `hex(SHA-256(secret || timestamp)) || timestamp`, timestamp in epoch millis.
pub fn compute_token(secret: &str, now_millis: i64) -> String {
    let timestamp = now_millis.to_string();

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(timestamp.as_bytes());

    format!("{}{}", hex::encode(hasher.finalize()), timestamp)
}

pub type Clock = fn() -> i64;

fn wall_clock_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Produces a fresh `api_token` for every outbound request.
#[derive(Clone)]
pub struct Credential {
    secret: String,
    clock: Clock,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_clock(secret, wall_clock_millis)
    }

    pub fn with_clock(secret: impl Into<String>, clock: Clock) -> Self {
        Self {
            secret: secret.into(),
            clock,
        }
    }

    pub fn api_token(&self) -> String {
        compute_token(&self.secret, (self.clock)())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("secret", &"***").finish()
    }
}
