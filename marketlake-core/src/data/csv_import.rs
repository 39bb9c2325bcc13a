//! CSV import provider.
//!
//! Reads `{dir}/{SYMBOL}.csv` exported from a broker or spreadsheet. This is
//! the offline fallback when every network provider is down. Headers are
//! passed through as-is; any header the normalizer can map (`Date`, `Open`,
//! `Close`, ...) is used, everything else is dropped.

use super::provider::{ProviderAdapter, ProviderFailure, ProviderResult, RawFrame, RawValue, Reliability};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CsvImportSettings {
    pub dir: PathBuf,
    pub priority: u32,
}

impl Default for CsvImportSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("imports"),
            priority: 30,
        }
    }
}

pub struct CsvImportProvider {
    settings: CsvImportSettings,
}

impl CsvImportProvider {
    pub fn new(settings: CsvImportSettings) -> Self {
        Self { settings }
    }

    fn file_path(&self, symbol: &str) -> PathBuf {
        self.settings.dir.join(format!("{symbol}.csv"))
    }

    /// Parse CSV text into a raw frame. Blank cells become nulls.
    fn parse<R: Read>(reader: R) -> ProviderResult {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| ProviderFailure::Malformed(format!("csv header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.is_empty() {
            return Err(ProviderFailure::EmptyPayload);
        }

        let mut columns: Vec<Vec<RawValue>> = vec![Vec::new(); headers.len()];
        for (row, record) in rdr.records().enumerate() {
            let record =
                record.map_err(|e| ProviderFailure::Malformed(format!("csv row {row}: {e}")))?;
            for (i, slot) in columns.iter_mut().enumerate() {
                let cell = record.get(i).unwrap_or_default();
                slot.push(if cell.is_empty() {
                    RawValue::Null
                } else {
                    RawValue::Text(cell.to_string())
                });
            }
        }

        if columns.first().map_or(true, Vec::is_empty) {
            return Err(ProviderFailure::EmptyPayload);
        }

        let mut frame = RawFrame::new();
        for (name, values) in headers.into_iter().zip(columns) {
            frame.push_column(name, values);
        }
        Ok(frame)
    }
}

impl ProviderAdapter for CsvImportProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn priority(&self) -> u32 {
        self.settings.priority
    }

    fn reliability(&self) -> Reliability {
        Reliability::Fallback
    }

    fn fetch(&self, symbol: &str) -> ProviderResult {
        let path = self.file_path(symbol);
        let file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProviderFailure::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            _ => ProviderFailure::Transport(format!("{}: {e}", path.display())),
        })?;
        Self::parse(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_blank_cells() {
        let text = "Date,Open,High,Low,Close,Adj Close,Volume\n\
                    2024-01-03,184.22,185.88,183.43,184.25,183.5,58414500\n\
                    2024-01-02,187.15,188.44,183.89,185.64,,82488700\n";
        let frame = CsvImportProvider::parse(text.as_bytes()).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(
            frame.column_names(),
            ["Date", "Open", "High", "Low", "Close", "Adj Close", "Volume"]
        );
        assert_eq!(frame.columns()[5].values[1], RawValue::Null);
        assert_eq!(
            frame.columns()[0].values[0],
            RawValue::Text("2024-01-03".into())
        );
    }

    #[test]
    fn header_only_is_empty_payload() {
        let err = CsvImportProvider::parse("Date,Open,High,Low,Close,Volume\n".as_bytes())
            .unwrap_err();
        assert_eq!(err, ProviderFailure::EmptyPayload);
    }

    #[test]
    fn missing_file_is_symbol_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvImportProvider::new(CsvImportSettings {
            dir: dir.path().to_path_buf(),
            priority: 30,
        });
        let err = provider.fetch("NOPE").unwrap_err();
        assert!(matches!(err, ProviderFailure::SymbolNotFound { .. }));
    }

    #[test]
    fn reads_symbol_file_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("MSFT.csv"),
            "date,open,high,low,close,volume\n2024-01-02,370.0,376.0,366.5,370.87,25258600\n",
        )
        .unwrap();
        let provider = CsvImportProvider::new(CsvImportSettings {
            dir: dir.path().to_path_buf(),
            priority: 30,
        });
        let frame = provider.fetch("MSFT").unwrap();
        assert_eq!(frame.height(), 1);
        assert_eq!(provider.reliability(), Reliability::Fallback);
    }
}
