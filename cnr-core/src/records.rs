use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Everything extracted for one case, as the portal presents it: seven named
/// tables, each a list of rows of column strings. An empty section means the
/// portal did not render that table for this case, which is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecordSet {
    pub case_details: Vec<Vec<String>>,
    pub case_status: Vec<Vec<String>>,
    pub petitioner_advocate: Vec<Vec<String>>,
    pub respondent_advocate: Vec<Vec<String>>,
    pub acts: Vec<Vec<String>>,
    pub case_history: Vec<Vec<String>>,
    pub order: Vec<Vec<String>>,
}

/// Rows of the table matching `selector` in `html`, one inner vector per
/// `<tr>`, one string per `<td>`. Returns an empty list when the table is
/// absent or the selector does not parse; never fails.
pub fn extract_table_rows(html: &str, selector: &str) -> Vec<Vec<String>> {
    let table_selector = match Selector::parse(selector) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(selector, error = %err, "invalid table selector");
            return Vec::new();
        }
    };
    let row_selector = Selector::parse("tr").expect("static selector");
    let cell_selector = Selector::parse("td").expect("static selector");

    let document = Html::parse_document(html);
    let Some(table) = document.select(&table_selector).next() else {
        return Vec::new();
    };

    table
        .select(&row_selector)
        .map(|row| {
            row.select(&cell_selector)
                .map(|cell| {
                    cell.text()
                        .map(str::trim)
                        .filter(|fragment| !fragment.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<table class="table case_details_table table-bordered">
  <tr><th>Case Type</th><th>Filing Number</th></tr>
  <tr><td>Civil  Appeal</td><td> 123/2022 </td></tr>
  <tr><td><span>CNR</span> <b>MHAU010012342022</b></td></tr>
</table>
<table class="table history_table">
  <tr><td>2022-01-01</td><td>Filed</td></tr>
</table>
</body></html>
"#;

    #[test]
    fn extracts_rows_and_cells() {
        let rows = extract_table_rows(PAGE, ".table.case_details_table.table-bordered");
        assert_eq!(rows.len(), 3);
        // header row has no <td> cells
        assert!(rows[0].is_empty());
        assert_eq!(rows[1], vec!["Civil  Appeal", "123/2022"]);
        assert_eq!(rows[2], vec!["CNR MHAU010012342022"]);
    }

    #[test]
    fn missing_table_yields_empty() {
        assert!(extract_table_rows(PAGE, ".table.acts_table.table-bordered").is_empty());
    }

    #[test]
    fn invalid_selector_yields_empty() {
        assert!(extract_table_rows(PAGE, ":::").is_empty());
    }

    #[test]
    fn record_set_serializes_with_portal_keys() {
        let records = CaseRecordSet {
            case_history: vec![vec!["2022-01-01".into(), "Filed".into()]],
            ..CaseRecordSet::default()
        };
        let value = serde_json::to_value(&records).unwrap();
        assert!(value.get("case_history").is_some());
        assert!(value.get("order").is_some());
        assert_eq!(value["case_details"], serde_json::json!([]));
    }
}
