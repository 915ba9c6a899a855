use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser::{BrowserError, PortalSession, SessionProvider};
use crate::captcha::CaptchaRecognizer;
use crate::config::LookupConfig;
use crate::records::CaseRecordSet;

use super::assembler::ResultAssembler;
use super::progress::{ProgressEvent, ProgressSender};

/// Shortest CAPTCHA the portal ever issues; a shorter guess is a misread.
const MIN_CAPTCHA_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("CNR number is required")]
    EmptyCaseNumber,
    #[error("max retries ({0}) exceeded for CAPTCHA solving")]
    RetriesExhausted(usize),
    #[error("lookup deadline of {0}s exceeded")]
    DeadlineExceeded(u64),
    #[error("lookup cancelled by caller")]
    Cancelled,
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Why a single CAPTCHA attempt did not validate.
enum AttemptFailure {
    /// Recognizer produced an empty or too-short guess.
    Recognition,
    /// The portal rejected the submitted CAPTCHA text.
    Validation,
    /// Any other failure along the way; may warrant a session restart.
    Transient(BrowserError),
}

/// Drives one lookup from session acquisition through extraction and tab
/// cleanup, emitting the progress sequence as it goes. Lookups are strictly
/// serialized: the engine holds one browser session and never lets two
/// lookups interleave on it.
pub struct LookupEngine {
    sessions: Arc<dyn SessionProvider>,
    recognizer: Arc<dyn CaptchaRecognizer>,
    assembler: ResultAssembler,
    config: Arc<LookupConfig>,
    serial: AsyncMutex<()>,
}

impl LookupEngine {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        recognizer: Arc<dyn CaptchaRecognizer>,
        config: Arc<LookupConfig>,
    ) -> Self {
        let assembler = ResultAssembler::new(config.selectors.clone());
        Self {
            sessions,
            recognizer,
            assembler,
            config,
            serial: AsyncMutex::new(()),
        }
    }

    /// Runs one lookup to its terminal event. Exactly one `success` or
    /// `error` event is emitted per call, and it is always the last one.
    pub async fn run(&self, case_number: &str, progress: &ProgressSender) {
        self.run_with_cancel(case_number, progress, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but aborts the current wait when `cancel`
    /// fires, closes the lookup tab, and emits the terminal error event.
    pub async fn run_with_cancel(
        &self,
        case_number: &str,
        progress: &ProgressSender,
        cancel: CancellationToken,
    ) {
        if case_number.trim().is_empty() {
            progress.emit(ProgressEvent::error(
                LookupError::EmptyCaseNumber.to_string(),
            ));
            return;
        }

        let _exclusive = self.serial.lock().await;

        let deadline_secs = self.config.timeouts.lookup_deadline_seconds;
        let mut session_slot: Option<Arc<dyn PortalSession>> = None;
        let driven = tokio::select! {
            outcome = tokio::time::timeout(
                Duration::from_secs(deadline_secs),
                self.drive(case_number, progress, &mut session_slot),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => Err(LookupError::DeadlineExceeded(deadline_secs)),
            },
            _ = cancel.cancelled() => Err(LookupError::Cancelled),
        };

        match driven {
            Ok(records) => {
                progress.emit(ProgressEvent::processing("Closing browser tab...", 98));
                close_tab_best_effort(session_slot.as_deref()).await;
                info!(case_number, "case lookup succeeded");
                progress.emit(ProgressEvent::success(
                    "Case details extracted successfully and tab closed!",
                    records,
                ));
            }
            Err(err) => {
                close_tab_best_effort(session_slot.as_deref()).await;
                self.recover_session_if_needed(&err, progress).await;
                warn!(case_number, error = %err, "case lookup failed");
                progress.emit(ProgressEvent::error(format!(
                    "Failed to extract case details: {err}"
                )));
            }
        }
    }

    /// Acquire, navigate, run the attempt loop, extract. Emits progress from
    /// 5% through 95%; terminal events and tab cleanup belong to the caller.
    async fn drive(
        &self,
        case_number: &str,
        progress: &ProgressSender,
        session_slot: &mut Option<Arc<dyn PortalSession>>,
    ) -> Result<CaseRecordSet, LookupError> {
        progress.emit(ProgressEvent::processing(
            "Initializing case details extraction...",
            5,
        ));
        let mut session = self.sessions.acquire().await?;
        *session_slot = Some(Arc::clone(&session));

        let search_url = self.config.search_url();
        if !self.on_portal(session.as_ref()).await? {
            progress.emit(ProgressEvent::processing(
                "Navigating to eCourts website...",
                10,
            ));
            session.navigate_if_needed(&search_url).await?;
            progress.emit(ProgressEvent::processing("Website loaded successfully", 15));
        }

        let max_attempts = self.config.retry.max_attempts;
        let mut attempt = 0usize;
        let mut validated = false;
        while attempt < max_attempts {
            let step = (attempt * 5) as u8;
            match self
                .run_attempt(session.as_ref(), case_number, attempt, progress)
                .await
            {
                Ok(()) => {
                    progress.emit(ProgressEvent::processing("CAPTCHA solved successfully!", 50));
                    validated = true;
                    break;
                }
                Err(AttemptFailure::Recognition) => {
                    progress.emit(ProgressEvent::processing(
                        format!(
                            "CAPTCHA reading failed, retrying... (attempt {}/{})",
                            attempt + 1,
                            max_attempts
                        ),
                        30 + step,
                    ));
                    self.refresh_or_restart(&mut session, session_slot, step, progress)
                        .await?;
                    attempt += 1;
                }
                Err(AttemptFailure::Validation) => {
                    progress.emit(ProgressEvent::processing(
                        format!(
                            "CAPTCHA validation failed, retrying... (attempt {}/{})",
                            attempt + 1,
                            max_attempts
                        ),
                        45 + step,
                    ));
                    self.refresh_or_restart(&mut session, session_slot, step, progress)
                        .await?;
                    attempt += 1;
                }
                Err(AttemptFailure::Transient(err)) => {
                    warn!(attempt = attempt + 1, error = %err, "lookup attempt failed");
                    progress.emit(ProgressEvent::processing(
                        format!("Error in attempt {}: {err}", attempt + 1),
                        30 + step,
                    ));
                    if attempt + 1 >= max_attempts {
                        return Err(LookupError::Browser(err));
                    }
                    progress.emit(ProgressEvent::processing(
                        "Refreshing page and retrying...",
                        35 + step,
                    ));
                    self.refresh_or_restart(&mut session, session_slot, step, progress)
                        .await?;
                    attempt += 1;
                }
            }
        }

        if !validated {
            return Err(LookupError::RetriesExhausted(max_attempts));
        }

        Ok(self.assembler.assemble(session.as_ref(), progress).await)
    }

    /// One CAPTCHA-entry-and-submit cycle against the current page.
    async fn run_attempt(
        &self,
        session: &dyn PortalSession,
        case_number: &str,
        attempt: usize,
        progress: &ProgressSender,
    ) -> Result<(), AttemptFailure> {
        let max_attempts = self.config.retry.max_attempts;
        let step = (attempt * 5) as u8;

        progress.emit(ProgressEvent::processing(
            format!(
                "Entering CNR number (attempt {}/{})...",
                attempt + 1,
                max_attempts
            ),
            20 + step,
        ));

        progress.emit(ProgressEvent::processing(
            format!(
                "Reading CAPTCHA image (attempt {}/{})...",
                attempt + 1,
                max_attempts
            ),
            25 + step,
        ));
        let image = session
            .capture_captcha_image()
            .await
            .map_err(AttemptFailure::Transient)?;
        let captcha_text = self.recognizer.recognize(&image).await;
        if captcha_text.len() < MIN_CAPTCHA_LEN {
            return Err(AttemptFailure::Recognition);
        }

        progress.emit(ProgressEvent::processing(
            format!(
                "CAPTCHA text extracted: \"{}\", submitting...",
                captcha_text.to_uppercase()
            ),
            35 + step,
        ));
        session
            .submit_attempt(case_number, &captcha_text)
            .await
            .map_err(AttemptFailure::Transient)?;

        progress.emit(ProgressEvent::processing(
            "Waiting for server response...",
            40 + step,
        ));
        let accepted = session
            .await_validation_outcome(Duration::from_secs(
                self.config.timeouts.validation_wait_seconds,
            ))
            .await
            .map_err(AttemptFailure::Transient)?;

        if accepted {
            Ok(())
        } else {
            Err(AttemptFailure::Validation)
        }
    }

    /// Refresh the page for a fresh CAPTCHA; when the refresh itself fails,
    /// fall back to a full session restart so the next attempt starts clean.
    async fn refresh_or_restart(
        &self,
        session: &mut Arc<dyn PortalSession>,
        session_slot: &mut Option<Arc<dyn PortalSession>>,
        step: u8,
        progress: &ProgressSender,
    ) -> Result<(), LookupError> {
        if let Err(err) = session.refresh().await {
            warn!(error = %err, "page refresh failed, restarting browser session");
            progress.emit(ProgressEvent::processing(
                "Restarting browser session...",
                25 + step,
            ));
            *session = self.sessions.restart().await?;
            *session_slot = Some(Arc::clone(session));
            session.navigate_if_needed(&self.config.search_url()).await?;
        }
        Ok(())
    }

    async fn on_portal(&self, session: &dyn PortalSession) -> Result<bool, LookupError> {
        let current = session.current_url().await.map_err(LookupError::Browser)?;
        let target = self.config.search_url();
        let on_target = match url::Url::parse(&target)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
        {
            Some(host) => current.contains(&host),
            None => current.starts_with(&target),
        };
        Ok(on_target)
    }

    /// Session-level fatal errors get one restart attempt before the terminal
    /// event, so the shared session is healthy for the next lookup no matter
    /// how this one ended.
    async fn recover_session_if_needed(&self, err: &LookupError, progress: &ProgressSender) {
        let session_level = matches!(err, LookupError::Browser(browser_err) if browser_err.is_session_level());
        if !session_level {
            return;
        }
        progress.emit(ProgressEvent::processing(
            "Browser session error detected, restarting...",
            15,
        ));
        match self.sessions.restart().await {
            Ok(_) => progress.emit(ProgressEvent::processing("Browser session restarted", 20)),
            Err(restart_err) => {
                warn!(error = %restart_err, "browser session restart failed");
            }
        }
    }
}

async fn close_tab_best_effort(session: Option<&dyn PortalSession>) {
    if let Some(session) = session {
        if let Err(err) = session.close_lookup_tab().await {
            warn!(error = %err, "failed to close lookup tab");
        }
    }
}
