mod error;
mod session;

pub use error::{BrowserError, BrowserResult};
pub use session::{ChromiumSession, PortalSession, SessionManager, SessionProvider};
