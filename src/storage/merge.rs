use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::storage::{CSV_HEADER, is_header, merged_log_path};

/// Result of one merge pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedLog {
    /// `None` when there was nothing to merge.
    pub output_path: Option<PathBuf>,

    /// Segments whose rows made it into the output, in merge order.
    pub source_segments: Vec<PathBuf>,

    /// Segments that could not be read and were left out.
    pub skipped_segments: Vec<PathBuf>,

    pub row_count: u64,
}

/// Concatenates the data rows of every `.csv` segment in `storage_dir` into
/// `merged.csv` under a single header.
///
/// Segments are taken in file name order, which for session files is start
/// time order. A segment that fails to read is logged and left out. The
/// output is written next to its final path and renamed into place, so a
/// reader never observes a partial merged log.
pub fn merge_session_files(storage_dir: &Path) -> Result<MergedLog> {
    let output_path = merged_log_path(storage_dir);
    let segments = list_segments(storage_dir)?;

    if segments.is_empty() {
        info!(dir = ?storage_dir, "no session files to merge");
        return Ok(MergedLog::default());
    }

    let partial_path = output_path.with_extension("csv.partial");
    let result = write_merged(&partial_path, segments).and_then(|merged| {
        fs::rename(&partial_path, &output_path).map_err(|e| Error::merge(&output_path, e))?;
        Ok(merged)
    });

    let mut merged = match result {
        Ok(merged) => merged,
        Err(err) => {
            if let Err(e) = fs::remove_file(&partial_path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(path = ?partial_path, "failed to remove partial merge output: {e}");
            }
            return Err(err);
        }
    };

    info!(
        files = merged.source_segments.len(),
        skipped = merged.skipped_segments.len(),
        rows = merged.row_count,
        path = ?output_path,
        "merged session files"
    );
    merged.output_path = Some(output_path);

    Ok(merged)
}

fn write_merged(partial_path: &Path, segments: Vec<PathBuf>) -> Result<MergedLog> {
    let mut merged = MergedLog::default();

    let output = File::create(partial_path).map_err(|e| Error::merge(partial_path, e))?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(output);
    writer
        .write_record(CSV_HEADER)
        .map_err(|e| Error::merge(partial_path, e))?;

    for segment in segments {
        let records = match read_data_rows(&segment) {
            Ok(records) => records,
            Err(err) => {
                warn!("{err}; skipping file");
                merged.skipped_segments.push(segment);
                continue;
            }
        };

        info!(path = ?segment, rows = records.len(), "merging file");
        for record in &records {
            writer
                .write_record(record)
                .map_err(|e| Error::merge(partial_path, e))?;
        }
        merged.row_count += records.len() as u64;
        merged.source_segments.push(segment);
    }

    writer.flush().map_err(|e| Error::merge(partial_path, e))?;

    Ok(merged)
}

/// Opens the merged log for streaming to a download client.
pub async fn open_merged_log(storage_dir: &Path) -> io::Result<tokio::fs::File> {
    tokio::fs::File::open(merged_log_path(storage_dir)).await
}

fn list_segments(storage_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(storage_dir).map_err(|e| Error::merge(storage_dir, e))?;
    let output_path = merged_log_path(storage_dir);

    let mut segments = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = ?storage_dir, "failed to read directory entry: {e}");
                continue;
            }
        };
        let path = entry.path();

        if path.extension().is_none_or(|ext| ext != "csv") || path == output_path {
            continue;
        }
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }

        segments.push(path);
    }
    segments.sort();

    Ok(segments)
}

/// Reads a whole segment up front so a failure midway adds nothing.
fn read_data_rows(path: &Path) -> Result<Vec<StringRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::merge(path, e))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::merge(path, e))?;
        if record.get(0).is_some_and(is_header) {
            continue;
        }
        rows.push(record);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Timestamp,Temperature(C),Humidity(%),MQ4_Voltage(V),MQ4_PPM,MQ7_Voltage(V),MQ7_CO_PPM";

    fn write_segment(dir: &Path, name: &str, rows: &[&str]) {
        let mut text = format!("{HEADER}\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn concatenates_rows_under_one_header() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            "data_2025_01_02_00_00_00.csv",
            &["2025-01-02 00:00:10,1.0,1.0,1.00,1.00,1.00,1.00"],
        );
        write_segment(
            dir.path(),
            "data_2025_01_01_00_00_00.csv",
            &[
                "2025-01-01 00:00:10,2.0,2.0,2.00,2.00,2.00,2.00",
                "2025-01-01 00:00:20,3.0,3.0,3.00,3.00,3.00,3.00",
            ],
        );

        let merged = merge_session_files(dir.path()).unwrap();

        let text = fs::read_to_string(dir.path().join("merged.csv")).unwrap();
        assert_eq!(
            text,
            format!(
                "{HEADER}\n\
                 2025-01-01 00:00:10,2.0,2.0,2.00,2.00,2.00,2.00\n\
                 2025-01-01 00:00:20,3.0,3.0,3.00,3.00,3.00,3.00\n\
                 2025-01-02 00:00:10,1.0,1.0,1.00,1.00,1.00,1.00\n"
            )
        );
        assert_eq!(merged.row_count, 3);
        assert_eq!(merged.source_segments.len(), 2);
        assert_eq!(merged.output_path, Some(dir.path().join("merged.csv")));
    }

    #[test]
    fn previous_merged_output_is_not_an_input() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            "data_2025_01_01_00_00_00.csv",
            &["2025-01-01 00:00:10,2.0,2.0,2.00,2.00,2.00,2.00"],
        );

        merge_session_files(dir.path()).unwrap();
        let merged = merge_session_files(dir.path()).unwrap();

        assert_eq!(merged.row_count, 1);
        let text = fs::read_to_string(dir.path().join("merged.csv")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), "data_2025_01_01_00_00_00.csv", &["a,b"]);
        fs::write(dir.path().join("notes.txt"), "Timestamp\nx\n").unwrap();
        fs::create_dir(dir.path().join("archive.csv")).unwrap();

        let merged = merge_session_files(dir.path()).unwrap();

        assert_eq!(merged.source_segments.len(), 1);
        assert_eq!(merged.row_count, 1);
    }

    #[test]
    fn no_segments_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();

        let merged = merge_session_files(dir.path()).unwrap();

        assert_eq!(merged, MergedLog::default());
        assert!(!dir.path().join("merged.csv").exists());
    }

    #[test]
    fn unreadable_segment_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            "data_2025_01_01_00_00_00.csv",
            &["2025-01-01 00:00:10,2.0,2.0,2.00,2.00,2.00,2.00"],
        );
        // Invalid UTF-8 makes the CSV reader fail on this file.
        fs::write(
            dir.path().join("data_2025_01_02_00_00_00.csv"),
            b"Timestamp\n\xff\xfe,1\n",
        )
        .unwrap();

        let merged = merge_session_files(dir.path()).unwrap();

        assert_eq!(merged.row_count, 1);
        assert_eq!(
            merged.skipped_segments,
            vec![dir.path().join("data_2025_01_02_00_00_00.csv")]
        );
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = merge_session_files(&dir.path().join("absent")).unwrap_err();

        assert!(matches!(err, Error::MergeFile { .. }));
    }

    #[test]
    fn failed_merge_leaves_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            "data_2025_01_01_00_00_00.csv",
            &["2025-01-01 00:00:10,2.0,2.0,2.00,2.00,2.00,2.00"],
        );
        // A non-empty directory in the way makes the final rename fail.
        fs::create_dir(dir.path().join("merged.csv")).unwrap();
        fs::write(dir.path().join("merged.csv").join("keep"), "").unwrap();

        let err = merge_session_files(dir.path()).unwrap_err();

        assert!(matches!(err, Error::MergeFile { .. }));
        assert!(!dir.path().join("merged.csv.partial").exists());
        assert!(dir.path().join("merged.csv").join("keep").exists());
    }

    #[tokio::test]
    async fn merged_log_can_be_streamed() {
        use tokio::io::AsyncReadExt as _;

        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), "data_2025_01_01_00_00_00.csv", &["x,y"]);
        merge_session_files(dir.path()).unwrap();

        let mut file = open_merged_log(dir.path()).await.unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).await.unwrap();

        assert_eq!(text, format!("{HEADER}\nx,y\n"));
    }
}
