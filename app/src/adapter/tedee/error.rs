use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum BridgeError {
    #[display("Bridge responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[display("Request to bridge timed out")]
    Timeout(reqwest_middleware::Error),

    #[display("Connection reset by bridge")]
    ConnectionReset(reqwest_middleware::Error),

    #[display("Error communicating with bridge: {_0}")]
    Transport(reqwest_middleware::Error),

    #[display("Error decoding bridge response: {_0}")]
    Decode(serde_json::Error),
}

impl BridgeError {
    pub fn from_transport(error: reqwest_middleware::Error) -> Self {
        let is_timeout = match &error {
            reqwest_middleware::Error::Reqwest(e) => e.is_timeout(),
            reqwest_middleware::Error::Middleware(_) => false,
        };

        if is_timeout {
            BridgeError::Timeout(error)
        } else if is_connection_reset(&error) {
            BridgeError::ConnectionReset(error)
        } else {
            BridgeError::Transport(error)
        }
    }

    /// Server-side failures (405..=599) and non-timeout transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Status { status, .. } => (405..=599).contains(status),
            BridgeError::ConnectionReset(_) | BridgeError::Transport(_) => true,
            BridgeError::Timeout(_) | BridgeError::Decode(_) => false,
        }
    }

    /// The bridge drops connections while it is busy talking to its locks.
    pub fn is_busy(&self) -> bool {
        matches!(self, BridgeError::ConnectionReset(_))
    }

    pub fn response_body(&self) -> Option<&str> {
        match self {
            BridgeError::Status { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

fn is_connection_reset(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);

    while let Some(e) = current {
        //bridge closed the connection after reading the request
        if let Some(hyper) = e.downcast_ref::<hyper::Error>() {
            if hyper.is_incomplete_message() {
                return true;
            }
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        current = e.source();
    }

    false
}
