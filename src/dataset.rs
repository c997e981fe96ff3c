//! Dataset de pacientes cargado desde CSV una única vez al arrancar.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::Record;

/// Columna objetivo (etiqueta) del dataset.
pub const LABEL_COLUMN: &str = "LUNG_CANCER";
pub const POSITIVE_LABEL: &str = "YES";
pub const SMOKING_COLUMN: &str = "SMOKING";
pub const FLAG_TRUE: &str = "1";
pub const AGE_COLUMN: &str = "AGE";
pub const GENDER_COLUMN: &str = "GENDER";
pub const MALE: &str = "M";
pub const FEMALE: &str = "F";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("no existe el fichero {0}")]
    NotFound(PathBuf),
    #[error("error leyendo CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Colección de registros en memoria, de sólo lectura tras la carga.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Record>,
    columns: Vec<String>,
    source: PathBuf,
}

impl Dataset {
    pub fn from_records(columns: Vec<String>, records: Vec<Record>) -> Self {
        Self {
            records,
            columns,
            source: PathBuf::new(),
        }
    }

    /// Carga el CSV; cualquier fallo produce un dataset vacío y un diagnóstico.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(dataset) => {
                info!("✅ Cargados {} registros médicos desde {}", dataset.len(), path.display());
                dataset
            }
            Err(DatasetError::NotFound(p)) => {
                warn!("❌ Dataset no encontrado en {}: se continúa sin datos", p.display());
                Self::empty_from(path)
            }
            Err(e) => {
                error!("❌ Error cargando el dataset {}: {e}", path.display());
                Self::empty_from(path)
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, DatasetError> {
        if !path.is_file() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let record: Record = columns
                .iter()
                .cloned()
                .zip(row.iter().map(str::to_string))
                .collect();
            records.push(record);
        }

        Ok(Self {
            records,
            columns,
            source: path.to_path_buf(),
        })
    }

    fn empty_from(path: &Path) -> Self {
        Self {
            source: path.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Todas las columnas excepto la etiqueta.
    pub fn feature_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| *c != LABEL_COLUMN)
            .collect()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Registros con la etiqueta positiva.
    pub fn positives(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| is_positive(r))
    }
}

pub fn value<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
    record.get(column).map(String::as_str)
}

pub fn is_positive(record: &Record) -> bool {
    value(record, LABEL_COLUMN) == Some(POSITIVE_LABEL)
}

pub fn flag_set(record: &Record, column: &str) -> bool {
    value(record, column) == Some(FLAG_TRUE)
}

/// Edad como entero; valores no numéricos (o con signo/decimales) se ignoran.
pub fn age_of(record: &Record) -> Option<u32> {
    let raw = value(record, AGE_COLUMN)?;
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_csv_rows_as_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "GENDER,AGE,SMOKING,LUNG_CANCER").unwrap();
        writeln!(file, "M,69,1,YES").unwrap();
        writeln!(file, "F,59,2,NO").unwrap();

        let dataset = Dataset::load(file.path());
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.feature_columns(), vec!["GENDER", "AGE", "SMOKING"]);
        assert_eq!(value(&dataset.records()[0], "AGE"), Some("69"));
        assert_eq!(dataset.positives().count(), 1);
    }

    #[test]
    fn missing_file_yields_empty_dataset() {
        let dataset = Dataset::load(Path::new("no/such/data.csv"));
        assert!(dataset.is_empty());
        assert!(dataset.feature_columns().is_empty());
    }

    #[test]
    fn malformed_file_yields_empty_dataset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "A,B").unwrap();
        writeln!(file, "1,2,3").unwrap();
        assert!(Dataset::load(file.path()).is_empty());
    }

    #[test]
    fn age_parsing_skips_non_numeric_values() {
        let ds = fixtures::dataset(&[
            ("M", "40", "1", "1", "1", "YES"),
            ("M", "n/a", "1", "1", "1", "YES"),
            ("M", "-3", "1", "1", "1", "YES"),
        ]);
        let ages: Vec<u32> = ds.records().iter().filter_map(age_of).collect();
        assert_eq!(ages, vec![40]);
    }
}
