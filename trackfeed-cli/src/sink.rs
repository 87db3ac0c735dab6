//! Date-partitioned record persistence.
//!
//! Each record is appended as one newline-terminated line to
//! `<dir>/<prefix>-YYYY-MM-DD.log`, where the date is the record's UTC receipt
//! date. A record dated after the open file's day closes that file and starts
//! the next one; the closed file is then LZ4-compressed to `.log.lz4` on the
//! blocking pool.

use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use lz4_flex::frame::FrameEncoder;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Accepts raw records from the bus consumer.
pub trait RecordSink: Send {
    fn write_record(
        &mut self,
        data: &[u8],
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Pushes buffered records to the operating system.
    fn flush(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Flushes and waits for any background work. Called once, at shutdown.
    fn close(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;
}

struct OpenDay {
    date: NaiveDate,
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct DailyFileSink {
    directory: PathBuf,
    prefix: String,
    compress: bool,
    current: Option<OpenDay>,
    compressing: Vec<JoinHandle<()>>,
}

impl DailyFileSink {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            compress: true,
            current: None,
            compressing: Vec::new(),
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d")))
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|day| day.path.as_path())
    }

    async fn day_for(&mut self, date: NaiveDate) -> Result<&mut OpenDay, SinkError> {
        let day = match self.current.take() {
            // stragglers stamped just before midnight stay in the newer file
            Some(day) if day.date >= date => day,
            Some(previous) => {
                let path = close_day(previous).await?;
                info!(path = %path.display(), "rotated output file");
                if self.compress {
                    self.compress_in_background(path);
                }
                self.open(date).await?
            }
            None => self.open(date).await?,
        };
        Ok(self.current.insert(day))
    }

    async fn open(&self, date: NaiveDate) -> Result<OpenDay, SinkError> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| SinkError::Io {
                path: self.directory.clone(),
                source,
            })?;

        let path = self.path_for(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "opened output file");

        Ok(OpenDay {
            date,
            path,
            writer: BufWriter::new(file),
        })
    }

    fn compress_in_background(&mut self, path: PathBuf) {
        self.compressing.retain(|task| !task.is_finished());
        self.compressing
            .push(tokio::task::spawn_blocking(move || match compress_file(&path) {
                Ok(target) => info!(path = %target.display(), "compressed rotated file"),
                Err(e) => error!(path = %path.display(), error = %e, "failed to compress rotated file"),
            }));
    }
}

impl RecordSink for DailyFileSink {
    async fn write_record(&mut self, data: &[u8], at: DateTime<Utc>) -> Result<(), SinkError> {
        let body = record_body(data);
        let day = self.day_for(at.date_naive()).await?;

        let written = async {
            day.writer.write_all(body).await?;
            day.writer.write_all(b"\n").await
        }
        .await;

        written.map_err(|source| SinkError::Io {
            path: day.path.clone(),
            source,
        })
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        match self.current.as_mut() {
            Some(day) => day.writer.flush().await.map_err(|source| SinkError::Io {
                path: day.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let closed = match self.current.take() {
            Some(day) => close_day(day).await.map(drop),
            None => Ok(()),
        };
        for task in self.compressing.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "compression task panicked");
            }
        }
        closed
    }
}

/// Flushes and closes the day's file, handing back its path.
async fn close_day(mut day: OpenDay) -> Result<PathBuf, SinkError> {
    match day.writer.shutdown().await {
        Ok(()) => Ok(day.path),
        Err(source) => Err(SinkError::Io {
            path: day.path,
            source,
        }),
    }
}

/// Writes `<path>.lz4` and removes `path` once the frame is complete.
fn compress_file(path: &Path) -> io::Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".lz4");
    let target = PathBuf::from(target);

    let mut source = std::fs::File::open(path)?;
    let out = std::io::BufWriter::new(std::fs::File::create(&target)?);
    let mut encoder = FrameEncoder::new(out);
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.flush()?;

    std::fs::remove_file(path)?;
    Ok(target)
}

/// Drops one trailing line terminator so every record ends with exactly one `\n`.
fn record_body(data: &[u8]) -> &[u8] {
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    data.strip_suffix(b"\r").unwrap_or(data)
}
