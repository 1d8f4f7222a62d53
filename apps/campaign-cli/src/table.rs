use std::path::Path;

use anyhow::{Context, Result, bail};
use wa_campaign_core::{ColumnMapping, FileTable};

/// Reads a CSV upload; the first record is the header row.
pub fn load_csv(path: &Path) -> Result<FileTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("read header row of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("read row {} of {}", i + 1, path.display()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(FileTable { headers, rows })
}

/// Reads a bulk list file as-is; resolution handles trimming and blanks.
pub fn load_bulk(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Parses `--map N=column`.
pub fn parse_mapping(raw: &str) -> Result<ColumnMapping> {
    let Some((index, column)) = raw.split_once('=') else {
        bail!("expected N=column, got {raw:?}");
    };
    let variable_index: usize = index
        .trim()
        .parse()
        .with_context(|| format!("variable number in {raw:?}"))?;
    if variable_index == 0 {
        bail!("variable numbers start at 1");
    }
    let column_name = column.trim();
    if column_name.is_empty() {
        bail!("missing column name in {raw:?}");
    }
    Ok(ColumnMapping {
        variable_index,
        column_name: column_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_header_and_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "phone, name ,eta").unwrap();
        writeln!(file, "9876543210,Ana,today").unwrap();
        writeln!(file, "+447911123456,\"Bo, Jr\"").unwrap();
        file.flush().unwrap();

        let table = load_csv(file.path()).unwrap();
        assert_eq!(table.headers, vec!["phone", "name", "eta"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["9876543210", "Ana", "today"]);
        assert_eq!(table.rows[1], vec!["+447911123456", "Bo, Jr"]);
    }

    #[test]
    fn parses_column_mappings() {
        let mapping = parse_mapping("2= name").unwrap();
        assert_eq!(mapping.variable_index, 2);
        assert_eq!(mapping.column_name, "name");
        assert!(parse_mapping("name").is_err());
        assert!(parse_mapping("0=name").is_err());
        assert!(parse_mapping("x=name").is_err());
        assert!(parse_mapping("1=").is_err());
    }
}
