use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

use crate::errors::ExternalSourceError;
use crate::random::RandomSource;
use fakeflow_schema::{ExternalCsvSource, ReadMode, parse_separator};

const READ_BUFFER_BYTES: usize = 64 * 1024;

type Column = Arc<[String]>;

/// One column of an external CSV file, loaded on first read and shared by
/// every worker.
#[derive(Debug)]
pub struct ExternalSource {
    config: ExternalCsvSource,
    column: OnceLock<Result<Column, ExternalSourceError>>,
    load_lock: Mutex<()>,
    cursor: Mutex<usize>,
}

impl ExternalSource {
    pub fn new(config: ExternalCsvSource) -> Self {
        Self {
            config,
            column: OnceLock::new(),
            load_lock: Mutex::new(()),
            cursor: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &ExternalCsvSource {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.column.get().is_some()
    }

    /// Serve one value: a uniformly random row or the next row in file order.
    pub fn read(&self, random: &RandomSource) -> Result<String, ExternalSourceError> {
        let column = self.column()?;
        let idx = match self.config.read_mode {
            ReadMode::Random => random.index(column.len()),
            ReadMode::Circular => {
                let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
                let idx = *cursor % column.len();
                *cursor = (idx + 1) % column.len();
                idx
            }
        };
        Ok(column[idx].clone())
    }

    /// Loaded column. The first caller loads it under `load_lock`; the
    /// outcome, success or failure, is cached for every later caller.
    pub fn column(&self) -> Result<Column, ExternalSourceError> {
        if let Some(loaded) = self.column.get() {
            return loaded.clone();
        }

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = self.column.get() {
            return loaded.clone();
        }
        let loaded = load_column(&self.config);
        let _ = self.column.set(loaded.clone());
        loaded
    }
}

fn load_column(config: &ExternalCsvSource) -> Result<Column, ExternalSourceError> {
    let started = Instant::now();
    let path = config.filepath.as_path();
    let delimiter = parse_separator(config.csv_separator.as_deref(), b',').ok_or_else(|| {
        ExternalSourceError::InvalidSeparator(config.csv_separator.clone().unwrap_or_default())
    })?;

    let file = File::open(path).map_err(|err| ExternalSourceError::Open {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(BufReader::with_capacity(READ_BUFFER_BYTES, file));

    let headers = reader.headers().map_err(|err| read_error(path, err))?;
    let idx = headers
        .iter()
        .position(|header| header == config.target_field)
        .ok_or_else(|| ExternalSourceError::MissingColumn {
            path: path.to_path_buf(),
            column: config.target_field.clone(),
        })?;
    debug!(
        event = "external_source_header",
        path = %path.display(),
        column = %config.target_field,
        index = idx
    );

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| read_error(path, err))?;
        values.push(record.get(idx).unwrap_or_default().to_string());
    }
    if values.is_empty() {
        return Err(ExternalSourceError::Empty {
            path: path.to_path_buf(),
            column: config.target_field.clone(),
        });
    }

    info!(
        event = "external_source_loaded",
        path = %path.display(),
        column = %config.target_field,
        rows = values.len(),
        duration_ms = started.elapsed().as_millis() as u64
    );
    Ok(values.into())
}

fn read_error(path: &Path, err: csv::Error) -> ExternalSourceError {
    ExternalSourceError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Barrier;
    use std::thread;

    fn temp_csv(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fakeflow_ext_{}.csv", uuid::Uuid::new_v4()));
        fs::write(&path, contents).expect("write csv");
        path
    }

    fn source(path: PathBuf, column: &str, read_mode: ReadMode) -> ExternalSource {
        ExternalSource::new(ExternalCsvSource {
            filepath: path,
            target_field: column.to_string(),
            csv_separator: None,
            read_mode,
        })
    }

    #[test]
    fn circular_reads_follow_file_order() {
        let path = temp_csv("id,city\n1,x\n2,y\n3,z\n");
        let source = source(path.clone(), "city", ReadMode::Circular);
        let random = RandomSource::from_seed(1);

        let reads: Vec<String> = (0..5)
            .map(|_| source.read(&random).expect("read"))
            .collect();
        assert_eq!(reads, vec!["x", "y", "z", "x", "y"]);
        fs::remove_file(path).ok();
    }

    #[test]
    fn concurrent_first_access_loads_once() {
        let path = temp_csv("city\na\nb\nc\n");
        let source = source(path.clone(), "city", ReadMode::Circular);
        let barrier = Barrier::new(8);

        let columns: Vec<Column> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        source.column().expect("column")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("join"))
                .collect()
        });
        let cached = source.column().expect("cached column");
        assert!(columns.iter().all(|column| Arc::ptr_eq(column, &cached)));
        fs::remove_file(path).ok();
    }

    #[test]
    fn concurrent_circular_reads_are_balanced() {
        let path = temp_csv("city\na\nb\nc\n");
        let source = source(path.clone(), "city", ReadMode::Circular);
        let random = RandomSource::from_seed(4);
        let barrier = Barrier::new(8);

        let mut counts: HashMap<String, usize> = HashMap::new();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        (0..125)
                            .map(|_| source.read(&random).expect("read"))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                for value in handle.join().expect("join") {
                    *counts.entry(value).or_default() += 1;
                }
            }
        });

        // 1000 reads over 3 rows
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.values().sum::<usize>(), 1000);
        assert!(counts.values().all(|count| *count == 333 || *count == 334));
        fs::remove_file(path).ok();
    }

    #[test]
    fn random_reads_stay_in_column() {
        let path = temp_csv("a;b\n1;q\n2;r\n");
        let mut config = source(path.clone(), "b", ReadMode::Random).config;
        config.csv_separator = Some(";".to_string());
        let source = ExternalSource::new(config);
        let random = RandomSource::from_seed(2);

        for _ in 0..20 {
            let value = source.read(&random).expect("read");
            assert!(value == "q" || value == "r");
        }
        fs::remove_file(path).ok();
    }

    #[test]
    fn missing_column_and_file_are_cached_errors() {
        let path = temp_csv("id\n1\n");
        let missing_column = source(path.clone(), "city", ReadMode::Random);
        let random = RandomSource::from_seed(1);
        let first = missing_column.read(&random).expect_err("missing column");
        assert!(matches!(first, ExternalSourceError::MissingColumn { .. }));
        fs::remove_file(&path).ok();
        // the file is gone but the cached outcome is replayed
        assert_eq!(missing_column.read(&random).expect_err("cached"), first);

        let absent = source(path, "id", ReadMode::Random);
        assert!(matches!(
            absent.read(&random),
            Err(ExternalSourceError::Open { .. })
        ));
    }

    #[test]
    fn header_only_file_is_empty() {
        let path = temp_csv("id,city\n");
        let source = source(path.clone(), "city", ReadMode::Circular);
        assert!(matches!(
            source.column(),
            Err(ExternalSourceError::Empty { .. })
        ));
        fs::remove_file(path).ok();
    }
}
