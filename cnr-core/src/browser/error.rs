use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium session init failed: {0}")]
    Init(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("element never appeared: {0}")]
    ElementNotFound(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("validation indicator never appeared")]
    ValidationTimeout,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Whether the error points at the browser handle itself rather than the
    /// page it is driving. Session-level failures require a restart before
    /// the handle can be trusted again.
    pub fn is_session_level(&self) -> bool {
        match self {
            BrowserError::Init(_) | BrowserError::Cdp(_) | BrowserError::Io(_) => true,
            BrowserError::Unexpected(message) => {
                let text = message.to_lowercase();
                text.contains("browser") || text.contains("chrome") || text.contains("session")
            }
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_failures_are_session_level() {
        assert!(BrowserError::Init("spawn failed".into()).is_session_level());
    }

    #[test]
    fn unexpected_chrome_text_is_session_level() {
        let err = BrowserError::Unexpected("chrome not reachable".into());
        assert!(err.is_session_level());
        let err = BrowserError::Unexpected("selector mismatch".into());
        assert!(!err.is_session_level());
    }

    #[test]
    fn page_state_failures_are_not_session_level() {
        assert!(!BrowserError::ElementNotFound("#captcha_image".into()).is_session_level());
        assert!(!BrowserError::ValidationTimeout.is_session_level());
    }
}
