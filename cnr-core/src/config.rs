use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct LookupConfig {
    pub portal: PortalSection,
    pub chromium: ChromiumSection,
    pub selectors: SelectorSection,
    pub timeouts: TimeoutsSection,
    pub ocr: OcrSection,
    pub retry: RetrySection,
    pub server: ServerSection,
}

impl LookupConfig {
    /// Absolute URL of the case-search page.
    pub fn search_url(&self) -> String {
        let base = self.portal.base_url.trim_end_matches('/');
        let path = self.portal.search_path.trim_start_matches('/');
        if path.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{path}")
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSection {
    pub base_url: String,
    pub search_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window_size: [u32; 2],
    pub extra_args: Vec<String>,
}

/// CSS selectors for the portal's search form and result tables. The portal
/// markup changes without notice; keeping these in config means a selector
/// update does not require a rebuild.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSection {
    pub case_number_input: String,
    pub captcha_image: String,
    pub captcha_input: String,
    pub search_button: String,
    pub validation_indicator: String,
    pub case_details_table: String,
    pub case_status_table: String,
    pub petitioner_advocate_table: String,
    pub respondent_advocate_table: String,
    pub acts_table: String,
    pub history_table: String,
    pub order_table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    pub page_load_seconds: u64,
    pub script_seconds: u64,
    pub element_wait_seconds: u64,
    pub validation_wait_seconds: u64,
    pub poll_interval_ms: u64,
    pub lookup_deadline_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrSection {
    pub endpoint: String,
    pub api_key: String,
    pub engine: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub bind_addr: String,
}

fn load_config_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path_ref = path.as_ref();
    let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
        source,
        path: path_ref.to_path_buf(),
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        source,
        path: path_ref.to_path_buf(),
    })
}

pub fn load_lookup_config<P: AsRef<Path>>(path: P) -> Result<LookupConfig> {
    load_config_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r##"
[portal]
base_url = "https://services.ecourts.gov.in/ecourtindia_v6"
search_path = ""

[chromium]
headless = true
sandbox = false
disable_gpu = true
window_size = [1920, 1080]
extra_args = []

[selectors]
case_number_input = "#cino"
captcha_image = "#captcha_image"
captcha_input = "#fcaptcha_code"
search_button = "#searchbtn"
validation_indicator = "#validateError"
case_details_table = ".table.case_details_table.table-bordered"
case_status_table = ".table.case_status_table.table-bordered"
petitioner_advocate_table = ".table.table-bordered.Petitioner_Advocate_table"
respondent_advocate_table = ".table.table-bordered.Respondent_Advocate_table"
acts_table = ".table.acts_table.table-bordered"
history_table = ".table.history_table"
order_table = ".table.order_table.table"

[timeouts]
page_load_seconds = 60
script_seconds = 30
element_wait_seconds = 10
validation_wait_seconds = 10
poll_interval_ms = 250
lookup_deadline_seconds = 180

[ocr]
endpoint = "https://api.ocr.space/parse/image"
api_key = "helloworld"
engine = "2"
timeout_seconds = 20

[retry]
max_attempts = 2

[server]
bind_addr = "0.0.0.0:5000"
"##;

    #[test]
    fn parses_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_lookup_config(file.path()).unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.selectors.case_number_input, "#cino");
        assert_eq!(config.timeouts.page_load_seconds, 60);
        assert_eq!(
            config.search_url(),
            "https://services.ecourts.gov.in/ecourtindia_v6/"
        );
    }

    #[test]
    fn search_url_joins_path_segments() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.replace("search_path = \"\"", "search_path = \"/search\"").as_bytes())
            .unwrap();
        let config = load_lookup_config(file.path()).unwrap();
        assert_eq!(
            config.search_url(),
            "https://services.ecourts.gov.in/ecourtindia_v6/search"
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_lookup_config("/nonexistent/cnr.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cnr.toml"));
    }
}
