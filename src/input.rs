//! Input spreadsheet reader.
//!
//! The spreadsheet needs at least an `ID` and a `CEP` column. Workbooks
//! (`.xlsx`, `.xlsm`, `.xlsb`, `.xls`, `.ods`) are read from their first sheet;
//! anything else is treated as a delimited-text export. Header matching is
//! case-insensitive, column order and extra columns do not matter.

use calamine::{open_workbook_auto, Data, Reader};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::errors::{AppError, ResultExt};
use crate::models::{normalize_cep, parse_id, InputRow};

const ID_COLUMN: &str = "ID";
const CEP_COLUMN: &str = "CEP";
const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Reads the input rows of `path`, in file order.
pub fn read_input(path: &Path) -> Result<Vec<InputRow>, AppError> {
    let is_workbook = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| WORKBOOK_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if is_workbook {
        return read_workbook(path).with_context(|| format!("Reading {}", path.display()));
    }

    let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    read_rows(BufReader::new(file)).with_context(|| format!("Reading {}", path.display()))
}

/// Reads input rows from the first sheet of a workbook.
pub fn read_workbook(path: &Path) -> Result<Vec<InputRow>, AppError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::InvalidInput("workbook has no sheets".to_string()))??;

    let mut sheet = range.rows();
    let headers: Vec<String> = sheet
        .next()
        .map(|cells| cells.iter().map(cell_text).collect())
        .ok_or_else(|| AppError::InvalidInput("first sheet is empty".to_string()))?;

    let mut rows = RowCollector::new(&headers)?;
    // Sheet rows are 1-based and the header sits on the first non-empty row.
    let first_line = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);
    for (offset, cells) in sheet.enumerate() {
        let cells: Vec<String> = cells.iter().map(cell_text).collect();
        rows.push(first_line + offset + 1, &cells)?;
    }

    let rows = rows.finish();
    tracing::debug!("Read {} input rows from workbook", rows.len());
    Ok(rows)
}

/// Reads input rows from any buffered source.
pub fn read_rows<R: BufRead>(mut source: R) -> Result<Vec<InputRow>, AppError> {
    let mut header_line = String::new();
    source.read_line(&mut header_line)?;
    let delimiter = sniff_delimiter(&header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(header_line.as_bytes().chain(source));

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = RowCollector::new(&headers)?;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        // Line 1 is the header.
        rows.push(line + 2, &cells)?;
    }

    let rows = rows.finish();
    tracing::debug!("Read {} input rows", rows.len());
    Ok(rows)
}

/// Renders a sheet cell the way a CSV export would hold it. Whole floats
/// render without a fraction (`1001000.0` becomes `1001000`).
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Validates and collects rows once the `ID`/`CEP` columns are located.
struct RowCollector {
    id_idx: usize,
    cep_idx: usize,
    rows: Vec<InputRow>,
}

impl RowCollector {
    fn new(headers: &[String]) -> Result<Self, AppError> {
        let column = |name: &str| -> Result<usize, AppError> {
            headers
                .iter()
                .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
                .ok_or_else(|| AppError::InvalidInput(format!("missing required column '{}'", name)))
        };
        Ok(Self {
            id_idx: column(ID_COLUMN)?,
            cep_idx: column(CEP_COLUMN)?,
            rows: Vec::new(),
        })
    }

    fn push(&mut self, line: usize, cells: &[String]) -> Result<(), AppError> {
        let cell = |idx: usize| cells.get(idx).map(|c| c.trim()).unwrap_or("");

        let raw_id = cell(self.id_idx);
        if raw_id.is_empty() && cells.iter().all(|c| c.trim().is_empty()) {
            return Ok(());
        }

        let id = parse_id(raw_id).context(format!("line {}", line))?;
        if let Some(previous) = self.rows.last() {
            if id <= previous.id {
                return Err(AppError::InvalidInput(format!(
                    "line {}: id {} does not follow id {}; rows must be in ascending id order",
                    line, id, previous.id
                )));
            }
        }

        let cep = normalize_cep(cell(self.cep_idx));
        self.rows.push(InputRow { id, cep });
        Ok(())
    }

    fn finish(self) -> Vec<InputRow> {
        self.rows
    }
}

fn sniff_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    let tabs = header_line.matches('\t').count();

    if tabs > semicolons && tabs > commas {
        b'\t'
    } else if semicolons > commas {
        b';'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(text: &str) -> Result<Vec<InputRow>, AppError> {
        read_rows(text.as_bytes())
    }

    #[test]
    fn test_reads_comma_separated() {
        let rows = rows("ID,CEP\n1,01001000\n2,01001-000\n3,00000000\n").unwrap();
        assert_eq!(
            rows,
            vec![
                InputRow::new(1, "01001000"),
                InputRow::new(2, "01001000"),
                InputRow::new(3, "00000000"),
            ]
        );
    }

    #[test]
    fn test_reads_semicolon_export_with_extra_columns() {
        let rows = rows("Nome;cep;id\nSé;1001000;1\nCopacabana;22041-001;2\n").unwrap();
        assert_eq!(rows[0], InputRow::new(1, "01001000"));
        assert_eq!(rows[1], InputRow::new(2, "22041001"));
    }

    #[test]
    fn test_accepts_float_ids_and_blank_lines() {
        let rows = rows("ID,CEP\n1.0,01001000\n,\n2.0,01310100\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, 2);
    }

    #[test]
    fn test_keeps_empty_cep() {
        let rows = rows("ID,CEP\n1,\n").unwrap();
        assert_eq!(rows, vec![InputRow::new(1, "")]);
    }

    #[test]
    fn test_missing_column() {
        let err = rows("ID,Endereco\n1,Rua X\n").unwrap_err();
        assert!(err.to_string().contains("CEP"));
    }

    #[test]
    fn test_rejects_unordered_ids() {
        let err = rows("ID,CEP\n2,01001000\n1,01001000\n").unwrap_err();
        assert!(err.to_string().contains("ascending"));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_reads_xlsx_first_sheet() {
        // Numeric CEP cells lose their leading zero in the sheet.
        let rows = read_input(&fixture("ceps.xlsx")).unwrap();
        assert_eq!(
            rows,
            vec![
                InputRow::new(1, "01001000"),
                InputRow::new(2, "69900000"),
                InputRow::new(3, "22041001"),
            ]
        );
    }

    #[test]
    fn test_missing_workbook_is_an_error() {
        let err = read_input(Path::new("does-not-exist.xlsx")).unwrap_err();
        assert!(err.to_string().contains("does-not-exist.xlsx"));
    }

    #[test]
    fn test_cell_text_matches_csv_rendering() {
        assert_eq!(cell_text(&Data::Float(1001000.0)), "1001000");
        assert_eq!(cell_text(&Data::Float(12.0)), "12");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::String(" 01001-000 ".into())), "01001-000");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("ID,CEP\n"), b',');
        assert_eq!(sniff_delimiter("ID;CEP\n"), b';');
        assert_eq!(sniff_delimiter("ID\tCEP\n"), b'\t');
    }
}
