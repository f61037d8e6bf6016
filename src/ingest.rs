// 📥 Ingestion - raw spreadsheet rows → typed application / funded rows
//
// Column names are resolved ONCE through a mapping. Nothing downstream of
// this module looks at header text again.

use crate::error::Result;
use crate::model::{ApplicationStatus, FinancingType};
use crate::normalize::{
    normalize_fee_pct, normalize_financing_type, normalize_state, normalize_status, parse_number,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Placeholder for application rows with a blank dealer cell
pub const UNKNOWN_DEALER: &str = "(Unknown Dealer)";

/// Placeholder for application rows with a blank state cell
pub const UNKNOWN_STATE: &str = "??";

// ============================================================================
// RAW ROWS
// ============================================================================

/// One tokenized spreadsheet row, header → cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// 1-based data row number (header excluded)
    pub line_number: usize,
    pub cells: HashMap<String, String>,
}

impl RawRow {
    pub fn new(line_number: usize, cells: HashMap<String, String>) -> Self {
        RawRow { line_number, cells }
    }

    /// Cell text for a mapped column; unmapped or absent columns read as ""
    pub fn get(&self, column: Option<&str>) -> &str {
        column
            .and_then(|c| self.cells.get(c))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// Headers plus rows of one extract
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Read a headered CSV file
pub fn load_rows(path: &Path) -> Result<RawTable> {
    let file = std::fs::File::open(path)?;
    read_rows(file)
}

/// Read headered CSV from any reader
pub fn read_rows<R: Read>(reader: R) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(RawRow::new(idx + 1, cells));
    }

    log::debug!("read {} rows with {} columns", rows.len(), headers.len());
    Ok(RawTable { headers, rows })
}

/// First header (in file order) matching any of the patterns, case-insensitive
fn pick_header(headers: &[String], patterns: &[&str]) -> Option<String> {
    let compiled: Vec<Regex> = patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();

    headers
        .iter()
        .find(|h| {
            let lowered = h.trim().to_lowercase();
            compiled.iter().any(|re| re.is_match(&lowered))
        })
        .cloned()
}

// ============================================================================
// APPLICATION EXTRACT
// ============================================================================

/// Which header holds which logical column in the applications extract
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub dealer: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub amount: Option<String>,
    pub apr: Option<String>,
    pub fee: Option<String>,
    pub ltv: Option<String>,
    pub financing_type: Option<String>,
}

impl ColumnMapping {
    /// Auto-map headers by keyword
    pub fn guess(headers: &[String]) -> Self {
        ColumnMapping {
            dealer: pick_header(headers, &[r"dealer|store|merchant|seller|partner|client|account"]),
            state: pick_header(headers, &[r"state\b|^st\b|state code|region code"]),
            status: pick_header(headers, &[r"status|decision|result|outcome"]),
            amount: pick_header(
                headers,
                &[r"loan amount|amount financed|financed amount|principal|funded amount|approval amount|gross amount|amt\b|^amount$"],
            ),
            apr: pick_header(headers, &[r"\bapr\b|rate\b|interest"]),
            fee: pick_header(headers, &[r"lender fee|discount|origination|doc(ument)? fee|\bfee\b"]),
            ltv: pick_header(headers, &[r"\bltv\b|loan[- ]?to[- ]?value"]),
            financing_type: pick_header(
                headers,
                &[r"franchise|independent|^fi\b|store type|channel|dealer type"],
            ),
        }
    }

    /// Number of logical columns that resolved to a header
    pub fn mapped_count(&self) -> usize {
        [
            &self.dealer,
            &self.state,
            &self.status,
            &self.amount,
            &self.apr,
            &self.fee,
            &self.ltv,
            &self.financing_type,
        ]
        .iter()
        .filter(|c| c.is_some())
        .count()
    }

    pub fn extract(&self, row: &RawRow) -> ApplicationRow {
        let dealer = row.get(self.dealer.as_deref()).trim();
        let state = normalize_state(row.get(self.state.as_deref()));
        let loan_amount = parse_number(row.get(self.amount.as_deref()));

        ApplicationRow {
            line_number: row.line_number,
            dealer: if dealer.is_empty() { UNKNOWN_DEALER.to_string() } else { dealer.to_string() },
            state: if state.is_empty() { UNKNOWN_STATE.to_string() } else { state },
            status: normalize_status(row.get(self.status.as_deref())),
            financing_type: normalize_financing_type(row.get(self.financing_type.as_deref())),
            loan_amount,
            apr: parse_number(row.get(self.apr.as_deref())),
            fee_pct: normalize_fee_pct(row.get(self.fee.as_deref()), loan_amount),
            ltv: parse_number(row.get(self.ltv.as_deref())),
        }
    }
}

/// Typed application row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRow {
    pub line_number: usize,
    pub dealer: String,
    pub state: String,
    pub status: ApplicationStatus,
    pub financing_type: FinancingType,
    pub loan_amount: Option<f64>,
    pub apr: Option<f64>,
    pub fee_pct: Option<f64>,
    pub ltv: Option<f64>,
}

// ============================================================================
// FUNDED EXTRACT
// ============================================================================

/// Which header holds which logical column in the funded extract
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundedColumnMapping {
    pub dealer: Option<String>,
    pub state: Option<String>,
    pub amount: Option<String>,
    pub apr: Option<String>,
    pub fee: Option<String>,
    pub ltv: Option<String>,
}

impl FundedColumnMapping {
    pub fn guess(headers: &[String]) -> Self {
        FundedColumnMapping {
            dealer: pick_header(headers, &[r"dealer|store|merchant|client|account"]),
            state: pick_header(headers, &[r"state\b|^st\b|state code|region"]),
            amount: pick_header(
                headers,
                &[r"loan amount|amount financed|funded|principal|af\b|amt\b|^amount$"],
            ),
            apr: pick_header(headers, &[r"\bapr\b|rate|interest"]),
            fee: pick_header(headers, &[r"lender fee|discount|disc%|origination|doc fee|\bfee\b"]),
            ltv: pick_header(headers, &[r"\bltv\b|loan[- ]?to[- ]?value"]),
        }
    }

    /// Funded cells are kept as reported; blank dealer/state stay blank so the
    /// matcher can classify the row as missing fields.
    pub fn extract(&self, row: &RawRow) -> FundedRow {
        let loan_amount = parse_number(row.get(self.amount.as_deref()));

        FundedRow {
            line_number: row.line_number,
            dealer: row.get(self.dealer.as_deref()).trim().to_string(),
            state: normalize_state(row.get(self.state.as_deref())),
            loan_amount,
            apr: parse_number(row.get(self.apr.as_deref())),
            fee_pct: normalize_fee_pct(row.get(self.fee.as_deref()), loan_amount),
            ltv: parse_number(row.get(self.ltv.as_deref())),
        }
    }
}

/// Typed funded-extract row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundedRow {
    pub line_number: usize,
    pub dealer: String,
    pub state: String,
    pub loan_amount: Option<f64>,
    pub apr: Option<f64>,
    pub fee_pct: Option<f64>,
    pub ltv: Option<f64>,
}

impl FundedRow {
    /// Convenience constructor for rows built in code
    pub fn new(line_number: usize, dealer: &str, state: &str, loan_amount: Option<f64>) -> Self {
        FundedRow {
            line_number,
            dealer: dealer.trim().to_string(),
            state: normalize_state(state),
            loan_amount,
            apr: None,
            fee_pct: None,
            ltv: None,
        }
    }
}

/// Extract every application row through a mapping
pub fn application_rows(table: &RawTable, mapping: &ColumnMapping) -> Vec<ApplicationRow> {
    table.rows.iter().map(|r| mapping.extract(r)).collect()
}

/// Extract every funded row through a mapping
pub fn funded_rows(table: &RawTable, mapping: &FundedColumnMapping) -> Vec<FundedRow> {
    table.rows.iter().map(|r| mapping.extract(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPS_CSV: &str = "Dealer Name,State,App Status,Loan Amount,APR,Lender Fee,LTV,Dealer Type\n\
ABC Motors,il,Approved,\"$15,000.00\",12.9,2.5%,95,Franchise\n\
,,Declined,,,,,\n\
XYZ Cars,WI,Funded,20000,9.9,400,110,\n";

    #[test]
    fn test_read_rows_and_guess_mapping() {
        let table = read_rows(APPS_CSV.as_bytes()).unwrap();
        assert_eq!(table.rows.len(), 3);

        let mapping = ColumnMapping::guess(&table.headers);
        assert_eq!(mapping.dealer.as_deref(), Some("Dealer Name"));
        assert_eq!(mapping.state.as_deref(), Some("State"));
        assert_eq!(mapping.status.as_deref(), Some("App Status"));
        assert_eq!(mapping.amount.as_deref(), Some("Loan Amount"));
        assert_eq!(mapping.apr.as_deref(), Some("APR"));
        assert_eq!(mapping.fee.as_deref(), Some("Lender Fee"));
        assert_eq!(mapping.ltv.as_deref(), Some("LTV"));
        assert_eq!(mapping.financing_type.as_deref(), Some("Dealer Type"));
        assert_eq!(mapping.mapped_count(), 8);
    }

    #[test]
    fn test_application_row_extraction() {
        let table = read_rows(APPS_CSV.as_bytes()).unwrap();
        let mapping = ColumnMapping::guess(&table.headers);
        let rows = application_rows(&table, &mapping);

        let abc = &rows[0];
        assert_eq!(abc.dealer, "ABC Motors");
        assert_eq!(abc.state, "IL");
        assert_eq!(abc.status, ApplicationStatus::Approved);
        assert_eq!(abc.financing_type, FinancingType::Franchise);
        assert_eq!(abc.loan_amount, Some(15000.0));
        assert_eq!(abc.fee_pct, Some(0.025));

        // Blank cells fall back to placeholders
        let blank = &rows[1];
        assert_eq!(blank.dealer, UNKNOWN_DEALER);
        assert_eq!(blank.state, UNKNOWN_STATE);
        assert_eq!(blank.status, ApplicationStatus::Denial);
        assert_eq!(blank.loan_amount, None);

        // Dollar fee converted against the loan amount; blank FI is Independent
        let xyz = &rows[2];
        assert_eq!(xyz.fee_pct, Some(0.02));
        assert_eq!(xyz.financing_type, FinancingType::Independent);
    }

    #[test]
    fn test_funded_rows_keep_blanks() {
        let csv = "Dealer,ST,Amount Financed,Rate,Discount\nABC Motors,IL,15000,8.9,1.5%\n,IL,9000,,\n";
        let table = read_rows(csv.as_bytes()).unwrap();
        let mapping = FundedColumnMapping::guess(&table.headers);
        assert_eq!(mapping.amount.as_deref(), Some("Amount Financed"));
        assert_eq!(mapping.fee.as_deref(), Some("Discount"));

        let rows = funded_rows(&table, &mapping);
        assert_eq!(rows[0].dealer, "ABC Motors");
        assert_eq!(rows[0].loan_amount, Some(15000.0));
        assert_eq!(rows[0].fee_pct, Some(0.015));
        assert_eq!(rows[1].dealer, "");
        assert_eq!(rows[1].line_number, 2);
    }

    #[test]
    fn test_load_rows_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.csv");
        std::fs::write(&path, APPS_CSV).unwrap();

        let table = load_rows(&path).unwrap();
        assert_eq!(table.headers.len(), 8);
        assert_eq!(table.rows[2].get(Some("Dealer Name")), "XYZ Cars");
        assert_eq!(table.rows[2].get(None), "");
    }
}
