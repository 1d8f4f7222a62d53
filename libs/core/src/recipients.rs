//! Recipient resolution for the three input modes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CampaignError;
use crate::prefs::{UserPreferences, normalize_country_code};
use crate::variables::VariableSlot;

/// Digits required for a subscriber number entered in single mode.
pub const SUBSCRIBER_DIGITS: usize = 10;
const MIN_E164_DIGITS: usize = 8;
const MAX_E164_DIGITS: usize = 15;
const VISUAL_SEPARATORS: [char; 5] = [' ', '-', '.', '(', ')'];

/// Flat, ordered list of destination identifiers (`+` followed by digits).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientSet(Vec<String>);

impl RecipientSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Parsed upload: the first line supplies the headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Binds the variable with 1-based number `variable_index` to a file column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub variable_index: usize,
    pub column_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    pub phone_column: String,
    pub variables: Vec<ColumnMapping>,
}

/// How the operator supplied recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RecipientInput {
    /// One subscriber number; the preference country code applies when
    /// `country_code` is absent.
    Single {
        #[serde(default)]
        country_code: Option<String>,
        number: String,
    },
    /// Newline-delimited numbers.
    Multiple { text: String },
    /// Uploaded table with a phone column and per-variable columns.
    File {
        table: FileTable,
        mapping: FileMapping,
    },
}

/// Result of [`resolve`]: either one recipient set sharing the same values,
/// or a file binding that yields recipients and values per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientPlan {
    Uniform(RecipientSet),
    PerRow(FileBinding),
}

/// A row that was not dispatched, with the 1-based data row number (the
/// header line is not counted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundRow {
    pub row: usize,
    pub recipient: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRows {
    pub bound: Vec<BoundRow>,
    pub skipped: Vec<RowError>,
}

/// Validated file input awaiting the template's slot list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBinding {
    table: FileTable,
    phone_column: usize,
    columns: BTreeMap<usize, usize>,
    country_code: String,
}

impl FileBinding {
    pub fn row_count(&self) -> usize {
        self.table.rows.len()
    }

    /// Produces one recipient and value list per row.
    ///
    /// Fails when the mapping leaves a slot unbound. Rows with an empty mapped
    /// cell or an invalid phone number are skipped and reported; rows where
    /// every cell is blank are ignored.
    pub fn bind(&self, slots: &[VariableSlot]) -> Result<FileRows, CampaignError> {
        let missing: Vec<usize> = (1..=slots.len())
            .filter(|n| !self.columns.contains_key(n))
            .collect();
        if !missing.is_empty() {
            return Err(CampaignError::IncompleteColumnMapping { missing });
        }

        let mut out = FileRows::default();
        for (i, cells) in self.table.rows.iter().enumerate() {
            let row = i + 1;
            if cells.iter().all(|c| c.trim().is_empty()) {
                debug!(row, "ignoring blank row");
                continue;
            }
            match self.bind_row(cells, slots.len()) {
                Ok((recipient, values)) => out.bound.push(BoundRow {
                    row,
                    recipient,
                    values,
                }),
                Err(reason) => out.skipped.push(RowError { row, reason }),
            }
        }
        Ok(out)
    }

    fn bind_row(&self, cells: &[String], slot_count: usize) -> Result<(String, Vec<String>), String> {
        let cell = |column: usize| {
            cells
                .get(column)
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .ok_or_else(|| format!("missing value for column {:?}", self.table.headers[column]))
        };
        let phone = cell(self.phone_column)?;
        let recipient = normalize_identifier(phone, &self.country_code)
            .map_err(|reason| format!("invalid phone number {phone:?}: {reason}"))?;
        let values = (1..=slot_count)
            .map(|n| cell(self.columns[&n]).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((recipient, values))
    }
}

/// Normalizes a recipient specification into a dispatchable plan.
///
/// ```
/// use wa_campaign_core::{resolve, RecipientInput, RecipientPlan, UserPreferences};
///
/// let plan = resolve(
///     RecipientInput::Single { country_code: Some("91".into()), number: "98765 43210".into() },
///     &UserPreferences::default(),
/// )
/// .unwrap();
/// let RecipientPlan::Uniform(set) = plan else { unreachable!() };
/// assert_eq!(set.as_slice(), ["+919876543210"]);
/// ```
pub fn resolve(
    input: RecipientInput,
    prefs: &UserPreferences,
) -> Result<RecipientPlan, CampaignError> {
    match input {
        RecipientInput::Single {
            country_code,
            number,
        } => resolve_single(country_code.as_deref(), &number, prefs).map(RecipientPlan::Uniform),
        RecipientInput::Multiple { text } => {
            resolve_multiple(&text, prefs.country_code()).map(RecipientPlan::Uniform)
        }
        RecipientInput::File { table, mapping } => {
            resolve_file(table, mapping, prefs.country_code()).map(RecipientPlan::PerRow)
        }
    }
}

fn resolve_single(
    country_code: Option<&str>,
    number: &str,
    prefs: &UserPreferences,
) -> Result<RecipientSet, CampaignError> {
    let country_code = match country_code {
        Some(code) => normalize_country_code(code)?,
        None => prefs.country_code().to_string(),
    };
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != SUBSCRIBER_DIGITS {
        return Err(CampaignError::InvalidPhoneNumber {
            input: number.to_string(),
            reason: format!("expected {SUBSCRIBER_DIGITS} digits, got {}", digits.len()),
        });
    }
    Ok(RecipientSet(vec![format!("+{country_code}{digits}")]))
}

// Duplicates are kept: repeated numbers are intentional resends.
fn resolve_multiple(text: &str, country_code: &str) -> Result<RecipientSet, CampaignError> {
    let mut recipients = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let recipient = normalize_identifier(line, country_code).map_err(|reason| {
            CampaignError::InvalidPhoneNumber {
                input: line.to_string(),
                reason: format!("line {}: {reason}", line_no + 1),
            }
        })?;
        recipients.push(recipient);
    }
    if recipients.is_empty() {
        return Err(CampaignError::NoRecipients);
    }
    Ok(RecipientSet(recipients))
}

fn resolve_file(
    table: FileTable,
    mapping: FileMapping,
    country_code: &str,
) -> Result<FileBinding, CampaignError> {
    if table.rows.is_empty() {
        return Err(CampaignError::NoRecipients);
    }
    let column = |name: &str| {
        table
            .headers
            .iter()
            .position(|h| h.trim() == name.trim())
            .ok_or_else(|| CampaignError::UnknownColumn(name.to_string()))
    };
    let phone_column = column(&mapping.phone_column)?;
    let mut columns = BTreeMap::new();
    for m in &mapping.variables {
        if columns.insert(m.variable_index, column(&m.column_name)?).is_some() {
            return Err(CampaignError::DuplicateColumnMapping(m.variable_index));
        }
    }
    Ok(FileBinding {
        table,
        phone_column,
        columns,
        country_code: country_code.to_string(),
    })
}

/// Reduces a raw number to `+` and digits, prefixing `country_code` when the
/// number has no leading `+`.
fn normalize_identifier(raw: &str, country_code: &str) -> Result<String, String> {
    let compact: String = raw
        .chars()
        .filter(|c| !VISUAL_SEPARATORS.contains(c))
        .collect();
    let (explicit, digits) = match compact.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("must contain only digits after an optional leading +".into());
    }
    let full = if explicit {
        digits.to_string()
    } else {
        format!("{country_code}{digits}")
    };
    if !(MIN_E164_DIGITS..=MAX_E164_DIGITS).contains(&full.len()) {
        return Err(format!(
            "expected {MIN_E164_DIGITS}-{MAX_E164_DIGITS} digits including the country code, got {}",
            full.len()
        ));
    }
    Ok(format!("+{full}"))
}
