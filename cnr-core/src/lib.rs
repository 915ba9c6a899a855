pub mod browser;
pub mod captcha;
pub mod config;
pub mod lookup;
pub mod records;

pub use config::{load_lookup_config, ConfigError, LookupConfig};
pub use lookup::{progress_channel, LookupEngine, LookupError, ProgressEvent, ProgressSender};
pub use records::CaseRecordSet;
