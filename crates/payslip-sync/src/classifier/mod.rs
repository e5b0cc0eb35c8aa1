//! Determines what kind of file an incoming directory entry is.
//!
//! Classification only looks at the path. Container signatures are checked
//! later, when the validator opens the file.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fixed filename prefix for payslip documents.
pub const PAYSLIP_PREFIX: &str = "Payslip";

/// The two OOXML workbook containers accepted for employee data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadsheetFormat {
    Xlsx,
    Xlsm,
}

impl SpreadsheetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "xlsx" => Some(Self::Xlsx),
            "xlsm" => Some(Self::Xlsm),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Xlsm => "xlsm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Spreadsheet { format: SpreadsheetFormat },
    Payslip { employee_id: String, period: String },
    Unrecognized { reason: String },
}

impl Candidate {
    pub fn kind(&self) -> Classification {
        match self {
            Self::Spreadsheet { .. } => Classification::Spreadsheet,
            Self::Payslip { .. } => Classification::Payslip,
            Self::Unrecognized { .. } => Classification::Unrecognized,
        }
    }
}

/// Coarse classification recorded on every processing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Spreadsheet,
    Payslip,
    Unrecognized,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "spreadsheet",
            Self::Payslip => "payslip",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn payslip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"^{}_([^_]+)_([^_]+)\.(?i:pdf)$",
            regex::escape(PAYSLIP_PREFIX)
        ))
        .expect("payslip pattern is a valid regex")
    })
}

/// Parses `Payslip_<employee_id>_<period>.pdf` into its two variable tokens.
pub fn parse_payslip_name(filename: &str) -> Option<(String, String)> {
    let caps = payslip_pattern().captures(filename)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

pub fn classify(path: &Path) -> Candidate {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        return Candidate::Unrecognized {
            reason: "file name is not valid UTF-8".to_string(),
        };
    };

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    if let Some(format) = SpreadsheetFormat::from_extension(extension) {
        return Candidate::Spreadsheet { format };
    }

    if extension.eq_ignore_ascii_case("pdf") {
        return match parse_payslip_name(filename) {
            Some((employee_id, period)) => Candidate::Payslip {
                employee_id,
                period,
            },
            None => Candidate::Unrecognized {
                reason: format!(
                    "PDF name '{}' does not match {}_<employee_id>_<period>.pdf",
                    filename, PAYSLIP_PREFIX
                ),
            },
        };
    }

    Candidate::Unrecognized {
        reason: format!("unsupported file type '{}'", filename),
    }
}
