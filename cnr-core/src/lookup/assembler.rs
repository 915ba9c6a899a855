use tracing::warn;

use crate::browser::PortalSession;
use crate::config::SelectorSection;
use crate::records::{extract_table_rows, CaseRecordSet};

use super::progress::{ProgressEvent, ProgressSender};

/// Pulls the seven record sections off the validated result page. Six come
/// from the rendered markup; the acts table is populated by in-page script,
/// so it is interrogated through the live session instead. A section that
/// cannot be extracted degrades to an empty list and the assembly continues.
pub struct ResultAssembler {
    selectors: SelectorSection,
}

impl ResultAssembler {
    pub fn new(selectors: SelectorSection) -> Self {
        Self { selectors }
    }

    pub async fn assemble(
        &self,
        session: &dyn PortalSession,
        progress: &ProgressSender,
    ) -> CaseRecordSet {
        progress.emit(ProgressEvent::processing("Extracting case details...", 60));
        let html = match session.page_html().await {
            Ok(html) => html,
            Err(err) => {
                warn!(error = %err, "failed to read result page markup");
                String::new()
            }
        };
        let case_details = extract_table_rows(&html, &self.selectors.case_details_table);

        progress.emit(ProgressEvent::processing("Extracting case status...", 65));
        let case_status = extract_table_rows(&html, &self.selectors.case_status_table);

        progress.emit(ProgressEvent::processing(
            "Extracting petitioner advocate details...",
            70,
        ));
        let petitioner_advocate =
            extract_table_rows(&html, &self.selectors.petitioner_advocate_table);

        progress.emit(ProgressEvent::processing(
            "Extracting respondent advocate details...",
            75,
        ));
        let respondent_advocate =
            extract_table_rows(&html, &self.selectors.respondent_advocate_table);

        progress.emit(ProgressEvent::processing("Extracting acts information...", 80));
        let acts = match session.extract_table_rows(&self.selectors.acts_table).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "acts extraction failed, continuing with empty section");
                Vec::new()
            }
        };

        progress.emit(ProgressEvent::processing("Extracting case history...", 85));
        let case_history = extract_table_rows(&html, &self.selectors.history_table);

        progress.emit(ProgressEvent::processing("Extracting order details...", 90));
        let order = extract_table_rows(&html, &self.selectors.order_table);

        progress.emit(ProgressEvent::processing("Compiling final results...", 95));
        CaseRecordSet {
            case_details,
            case_status,
            petitioner_advocate,
            respondent_advocate,
            acts,
            case_history,
            order,
        }
    }
}
