//! MICR line parsing
//!
//! Grammar: the last non-blank line of the recognised text, reduced to
//! digits, whitespace and decimal points, split on whitespace runs. Tokens
//! are assigned by position: routing, account, check number, amount.
//! Extra tokens are ignored and nothing is validated.

use serde::{Deserialize, Serialize};

/// Fields read off the MICR line of a check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Cleaned line the fields were taken from
    #[serde(default)]
    pub raw_line: String,
}

impl MicrFields {
    /// Number of populated positional fields
    pub fn populated(&self) -> usize {
        [
            &self.routing_number,
            &self.account_number,
            &self.check_number,
            &self.amount,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.populated() == 0 && self.raw_line.is_empty()
    }
}

/// Drop every character that cannot be part of a MICR field
pub fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|c| c.is_ascii_digit() || c.is_whitespace() || *c == '.')
        .collect()
}

/// Parse raw recognised text into positional MICR fields
pub fn parse_micr(raw: &str) -> MicrFields {
    let Some(line) = raw.lines().rev().find(|line| !line.trim().is_empty()) else {
        return MicrFields::default();
    };

    let cleaned = clean_line(line);
    let mut tokens = cleaned.split_whitespace().map(str::to_string);

    MicrFields {
        routing_number: tokens.next(),
        account_number: tokens.next(),
        check_number: tokens.next(),
        amount: tokens.next(),
        raw_line: cleaned,
    }
}
