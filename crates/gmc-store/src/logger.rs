//! The rotating CSV data log.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{COLUMNS, LogRecord};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Data log configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Whether readings are logged at all.
    pub enabled: bool,
    /// Path of the active log file.
    pub csv_file: PathBuf,
    /// Size bound of each log file, in megabytes.
    pub max_file_size_mb: f64,
    /// Whether [`DataLogger::export`] is allowed.
    pub enable_export: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            csv_file: PathBuf::from("gmc_data.csv"),
            max_file_size_mb: 100.0,
            enable_export: true,
        }
    }
}

impl LogConfig {
    /// The size bound in bytes.
    pub fn max_bytes(&self) -> u64 {
        (self.max_file_size_mb * BYTES_PER_MB).max(0.0) as u64
    }
}

/// Summary of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Log files read, archives included.
    pub files: usize,
    /// Rows written to the export.
    pub rows: usize,
    /// Rows skipped because they could not be decoded.
    pub skipped: usize,
}

/// Appends readings to a size-bounded CSV file, rotating it when full.
///
/// Rotated files are named after the active file plus a
/// `.YYYYMMDD_HHMMSS` suffix (UTC) and are never written again.
#[derive(Debug, Clone)]
pub struct DataLogger {
    config: LogConfig,
}

impl DataLogger {
    /// Create a logger. No file is touched until the first append.
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Path of the active log file.
    pub fn path(&self) -> &Path {
        &self.config.csv_file
    }

    /// Append one row, rotating first if the row would overflow the file.
    ///
    /// A no-op when logging is disabled.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let row = encode_row(record)?;
        let max = self.config.max_bytes();
        let mut size = self.current_size()?;

        if size > 0 && size + row.len() as u64 > max {
            self.rotate()?;
            size = 0;
        }

        let mut buf = Vec::with_capacity(row.len() + 64);
        if size == 0 {
            self.ensure_parent()?;
            buf.extend_from_slice(&header()?);
        }
        buf.extend_from_slice(&row);

        if size == 0 && buf.len() as u64 > max {
            warn!(
                "Row of {} bytes exceeds the {} byte log bound; writing it anyway",
                buf.len(),
                max
            );
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.csv_file)?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// Size of the active file, zero if it does not exist.
    pub fn current_size(&self) -> Result<u64> {
        match fs::metadata(&self.config.csv_file) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename the active file to a timestamped archive.
    ///
    /// Returns the archive path.
    pub fn rotate(&self) -> Result<PathBuf> {
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;

        let base = archive_prefix(&self.config.csv_file);
        let mut target = PathBuf::from(format!("{base}{stamp}"));
        let mut n = 1;
        while target.exists() {
            target = PathBuf::from(format!("{base}{stamp}.{n}"));
            n += 1;
        }

        fs::rename(&self.config.csv_file, &target).map_err(|source| Error::Rotate {
            path: self.config.csv_file.clone(),
            source,
        })?;
        info!("Rotated data log to {}", target.display());
        Ok(target)
    }

    /// Rotated archives of the active file, oldest first.
    pub fn archives(&self) -> Result<Vec<PathBuf>> {
        let file_name = match self.config.csv_file.file_name().and_then(|n| n.to_str()) {
            Some(name) => format!("{name}."),
            None => return Ok(Vec::new()),
        };

        let entries = match fs::read_dir(self.parent()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(&file_name)) else {
                continue;
            };
            if let Some(key) = archive_key(suffix) {
                archives.push((key, entry.path()));
            }
        }
        archives.sort();
        Ok(archives.into_iter().map(|(_, path)| path).collect())
    }

    /// Copy every logged row, optionally limited to `[from, to]`, into one
    /// CSV file at `output`.
    ///
    /// Archives are read oldest first, then the active file. Rows that cannot
    /// be decoded are skipped.
    pub fn export(
        &self,
        output: &Path,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<ExportSummary> {
        if !self.config.enabled || !self.config.enable_export {
            return Err(Error::Disabled);
        }

        let mut sources = self.archives()?;
        if self.config.csv_file.exists() {
            sources.push(self.config.csv_file.clone());
        }
        if sources.iter().any(|source| same_file(source, output)) {
            return Err(Error::ExportTarget(output.to_path_buf()));
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(output)?;
        writer.write_record(COLUMNS)?;

        let mut summary = ExportSummary::default();
        for source in &sources {
            let mut reader = csv::Reader::from_path(source)?;
            summary.files += 1;
            for row in reader.deserialize::<LogRecord>() {
                let record = match row {
                    Ok(record) => record,
                    Err(e) => {
                        debug!("Skipping row in {}: {}", source.display(), e);
                        summary.skipped += 1;
                        continue;
                    }
                };
                if from.is_some_and(|from| record.timestamp < from)
                    || to.is_some_and(|to| record.timestamp > to)
                {
                    continue;
                }
                writer.serialize(&record)?;
                summary.rows += 1;
            }
        }
        writer.flush()?;

        if summary.skipped > 0 {
            warn!("Skipped {} undecodable rows during export", summary.skipped);
        }
        info!(
            "Exported {} rows from {} files to {}",
            summary.rows,
            summary.files,
            output.display()
        );
        Ok(summary)
    }

    fn parent(&self) -> &Path {
        match self.config.csv_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn ensure_parent(&self) -> Result<()> {
        let parent = self.parent();
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

fn encode_row(record: &LogRecord) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(record)?;
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

fn header() -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

fn archive_prefix(path: &Path) -> String {
    format!("{}.", path.display())
}

/// Sort key of an archive suffix: `YYYYMMDD_HHMMSS` with an optional `.N`.
fn archive_key(suffix: &str) -> Option<(String, u32)> {
    let (stamp, counter) = match suffix.split_once('.') {
        Some((stamp, counter)) => (stamp, counter.parse().ok()?),
        None => (suffix, 0),
    };
    let valid = stamp.len() == 15
        && stamp.char_indices().all(|(i, c)| {
            if i == 8 {
                c == '_'
            } else {
                c.is_ascii_digit()
            }
        });
    valid.then(|| (stamp.to_string(), counter))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
