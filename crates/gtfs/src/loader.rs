//! Chunked, parallel loader for GTFS text files.
//!
//! `stop_times.txt` routinely runs to several hundred thousand rows, so the
//! reader thread hands fixed-size chunks of raw text to a small pool of
//! parser threads. Each chunk is re-prefixed with the header line and parsed
//! independently; row order across chunks is unspecified.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _};
use std::path::Path;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use serde::de::DeserializeOwned;

/// Some agency exports carry a byte order mark in front of the header row.
/// Left in place it corrupts the first column name.
const BOM: char = '\u{feff}';

/// Allow-list filter: column name to acceptable values. A row survives only
/// if every listed column holds one of its acceptable values.
pub type KeepFilter = HashMap<String, HashSet<String>>;

/// Tunables for the loader, set once at startup and threaded through
/// database construction.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Upper bound on parser threads.
    pub max_threads: usize,

    /// Data rows handed to a parser thread at a time.
    pub max_rows_per_chunk: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            max_rows_per_chunk: 100_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("could not read {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{filename} has no column {column:?} to filter on")]
    MissingColumn { filename: String, column: String },

    #[error("malformed row in {filename}: {source}")]
    MalformedRow {
        filename: String,
        #[source]
        source: csv::Error,
    },

    #[error("parser thread for {filename} panicked")]
    WorkerPanicked { filename: String },
}

type ChunkRows<T> = Result<(Vec<T>, usize), LoaderError>;

/// Loads a GTFS text file into one record per row, dropping rows that do not
/// match `keep`. Any malformed row fails the whole load.
///
/// Callers must not rely on row order: chunks are parsed concurrently and
/// concatenated as the workers finish.
pub fn load<T>(
    path: impl AsRef<Path>,
    config: &LoaderConfig,
    keep: Option<&KeepFilter>,
) -> Result<Vec<T>, LoaderError>
where
    T: DeserializeOwned + Send,
{
    let path = path.as_ref();
    let filename = path.display().to_string();

    let io_error = |source| LoaderError::Io {
        filename: path.display().to_string(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let mut reader = BufReader::new(file);

    let mut header = String::new();
    reader.read_line(&mut header).map_err(io_error)?;
    if let Some(stripped) = header.strip_prefix(BOM) {
        header = stripped.to_owned();
    }

    let workers = config.max_threads.max(1);

    // N workers plus a queue of N - 1 bounds the chunks in flight at 2N - 1,
    // so the reader blocks instead of buffering the whole file when the
    // parsers fall behind.
    let (chunk_tx, chunk_rx) = mpsc::sync_channel::<String>(workers - 1);
    let chunk_rx = Arc::new(Mutex::new(chunk_rx));

    let mut rows = Vec::new();
    let mut discarded = 0usize;

    thread::scope(|scope| -> Result<(), LoaderError> {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let chunk_rx = Arc::clone(&chunk_rx);
            let header = header.as_str();
            let filename = filename.as_str();
            handles.push(scope.spawn(move || parse_chunks::<T>(filename, header, keep, chunk_rx)));
        }
        // The workers hold the only remaining receivers; once they are done
        // the channel disconnects and the reader stops.
        drop(chunk_rx);

        let fed = feed_chunks(&mut reader, &chunk_tx, config.max_rows_per_chunk.max(1), &filename);
        drop(chunk_tx);

        for handle in handles {
            let (mut chunk_rows, chunk_discarded) = handle
                .join()
                .map_err(|_| LoaderError::WorkerPanicked {
                    filename: filename.clone(),
                })??;
            rows.append(&mut chunk_rows);
            discarded += chunk_discarded;
        }
        fed
    })?;

    log::debug!(
        "loaded {:?}: {} rows, {} discarded (filtering on {:?})",
        filename,
        rows.len(),
        discarded,
        keep.map(|keep| keep.keys().collect::<Vec<_>>()).unwrap_or_default()
    );

    Ok(rows)
}

/// Reader side: accumulates `max_rows` lines at a time and hands them to the
/// workers, blocking while the queue is full.
fn feed_chunks(
    reader: &mut impl BufRead,
    chunks: &SyncSender<String>,
    max_rows: usize,
    filename: &str,
) -> Result<(), LoaderError> {
    let mut chunk = String::new();
    let mut count = 0usize;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(|source| LoaderError::Io {
            filename: filename.to_owned(),
            source,
        })?;
        if read == 0 {
            break;
        }

        chunk.push_str(&line);
        count += 1;

        if count == max_rows {
            // A send error means every worker has already stopped; the first
            // join below reports why.
            if chunks.send(std::mem::take(&mut chunk)).is_err() {
                return Ok(());
            }
            count = 0;
        }
    }

    if !chunk.is_empty() {
        let _ = chunks.send(chunk);
    }
    Ok(())
}

/// Worker side: parses chunks until the reader hangs up.
fn parse_chunks<T>(
    filename: &str,
    header: &str,
    keep: Option<&KeepFilter>,
    chunks: Arc<Mutex<Receiver<String>>>,
) -> ChunkRows<T>
where
    T: DeserializeOwned,
{
    let mut rows = Vec::new();
    let mut discarded = 0usize;

    loop {
        let chunk = {
            let receiver = match chunks.lock() {
                Ok(receiver) => receiver,
                Err(_) => break,
            };
            receiver.recv()
        };
        let Ok(chunk) = chunk else {
            break;
        };

        let (mut chunk_rows, chunk_discarded) = parse_chunk(filename, header, keep, &chunk)?;
        rows.append(&mut chunk_rows);
        discarded += chunk_discarded;
    }

    Ok((rows, discarded))
}

fn parse_chunk<T>(
    filename: &str,
    header: &str,
    keep: Option<&KeepFilter>,
    chunk: &str,
) -> ChunkRows<T>
where
    T: DeserializeOwned,
{
    let malformed = |source| LoaderError::MalformedRow {
        filename: filename.to_owned(),
        source,
    };

    let mut reader = csv::Reader::from_reader(header.as_bytes().chain(chunk.as_bytes()));
    let headers = reader.headers().map_err(malformed)?.clone();

    // Resolve the keep columns to indices once per chunk.
    let mut filters = Vec::new();
    if let Some(keep) = keep {
        for (column, accepted) in keep {
            let index = headers
                .iter()
                .position(|name| name == column)
                .ok_or_else(|| LoaderError::MissingColumn {
                    filename: filename.to_owned(),
                    column: column.clone(),
                })?;
            filters.push((index, accepted));
        }
    }

    let mut rows = Vec::new();
    let mut discarded = 0usize;

    for record in reader.into_records() {
        let record = record.map_err(malformed)?;
        let matches = filters
            .iter()
            .all(|(index, accepted)| record.get(*index).is_some_and(|value| accepted.contains(value)));
        if !matches {
            discarded += 1;
            continue;
        }
        rows.push(record.deserialize(Some(&headers)).map_err(malformed)?);
    }

    Ok((rows, discarded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::stop_times::StopTime;

    const STOP_TIMES: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/schedule/stop_times.txt");
    const BROKEN: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/broken/stop_times.txt");

    fn keep(column: &str, values: &[&str]) -> KeepFilter {
        KeepFilter::from([(
            column.to_owned(),
            values.iter().map(|value| value.to_string()).collect(),
        )])
    }

    #[test]
    fn loads_every_row_without_a_filter() {
        let rows: Vec<StopTime> = load(STOP_TIMES, &LoaderConfig::default(), None).expect("load");
        assert_eq!(rows.len(), 13);
        // The byte order mark in front of the header must not leak into the
        // first column name, or trip_id would never deserialize.
        assert!(rows.iter().any(|row| row.trip_id == "1167"));
    }

    #[test]
    fn filters_rows_on_a_single_column() {
        let filter = keep("stop_id", &["8250DB003076"]);
        let rows: Vec<StopTime> =
            load(STOP_TIMES, &LoaderConfig::default(), Some(&filter)).expect("load");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.stop_id == "8250DB003076"));
    }

    #[test]
    fn filter_columns_are_anded() {
        let mut filter = keep("trip_id", &["1167"]);
        filter.extend(keep("stop_id", &["8250DB003076"]));
        let rows: Vec<StopTime> =
            load(STOP_TIMES, &LoaderConfig::default(), Some(&filter)).expect("load");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stop_sequence, 30);
    }

    #[test]
    fn small_chunks_see_every_row() {
        let config = LoaderConfig {
            max_threads: 2,
            max_rows_per_chunk: 2,
        };
        let rows: Vec<StopTime> = load(STOP_TIMES, &config, None).expect("load");
        assert_eq!(rows.len(), 13);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result: Result<Vec<StopTime>, _> =
            load("no/such/file.txt", &LoaderConfig::default(), None);
        assert!(matches!(result, Err(LoaderError::Io { .. })));
    }

    #[test]
    fn unknown_filter_column_fails_the_load() {
        let filter = keep("no_such_column", &["x"]);
        let result: Result<Vec<StopTime>, _> =
            load(STOP_TIMES, &LoaderConfig::default(), Some(&filter));
        assert!(matches!(result, Err(LoaderError::MissingColumn { .. })));
    }

    #[test]
    fn malformed_rows_fail_the_load() {
        let result: Result<Vec<StopTime>, _> = load(BROKEN, &LoaderConfig::default(), None);
        assert!(matches!(result, Err(LoaderError::MalformedRow { .. })));
    }
}
