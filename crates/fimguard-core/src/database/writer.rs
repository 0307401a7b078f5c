use super::codec::{self, Field, Header, DELIMITER, END_DIRECTIVE};
use super::location::DatabaseLocation;
use crate::attributes::AttrSet;
use crate::entry::Entry;
use crate::error::{GuardError, Result};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info};

#[derive(Debug)]
enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w,
        }
    }

    /// Flush every layer and sync the file to disk
    fn close(self) -> io::Result<()> {
        let buffered = match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w.finish()?,
        };
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

/// Writes a database to a temporary sibling and moves it into place on
/// [`finish`](DatabaseWriter::finish). Dropping the writer early removes the
/// temporary file and leaves any existing database untouched.
#[derive(Debug)]
pub struct DatabaseWriter {
    path: PathBuf,
    header: Header,
    sink: Sink,
    temp: TempPath,
    records: usize,
    last_path: Option<String>,
}

impl DatabaseWriter {
    /// Create a writer persisting `attrs` for every entry
    pub fn create(location: &DatabaseLocation, attrs: AttrSet) -> Result<Self> {
        let path = location.path.clone();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write_err = |source: io::Error| GuardError::Write {
            location: path.clone(),
            source,
        };

        let (file, temp) = NamedTempFile::new_in(&dir)
            .map_err(write_err)?
            .into_parts();
        let buffered = BufWriter::new(file);
        let sink = if location.compressed {
            Sink::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Sink::Plain(buffered)
        };

        let mut writer = Self {
            header: Header::for_attrs(attrs),
            path: path.clone(),
            sink,
            temp,
            records: 0,
            last_path: None,
        };
        let preamble = format!(
            "# fimguard database\n# generated {}\n{}\n",
            Utc::now().to_rfc3339(),
            writer.header
        );
        writer.write_raw(&preamble)?;
        debug!(database = %location, header = %writer.header, "writing database");
        Ok(writer)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_raw(&mut self, text: &str) -> Result<()> {
        self.sink
            .writer()
            .write_all(text.as_bytes())
            .map_err(|source| GuardError::Write {
                location: self.path.clone(),
                source,
            })
    }

    /// Append one record. Entries must arrive in strictly increasing path
    /// order; values outside the stored set are dropped.
    pub fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_path {
            if entry.path.as_str() <= last.as_str() {
                return Err(GuardError::Write {
                    location: self.path.clone(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("'{}' written out of order after '{}'", entry.path, last),
                    ),
                });
            }
        }

        let fields: Vec<String> = self
            .header
            .fields
            .iter()
            .map(|field| match field {
                Field::Path => codec::escape(&entry.path),
                Field::Attr => format!("{:x}", entry.requested.bits()),
                Field::Value(attr) => entry
                    .get(*attr)
                    .map(codec::encode_value)
                    .unwrap_or_default(),
            })
            .collect();
        let mut line = fields.join(&DELIMITER.to_string());
        line.push('\n');
        self.write_raw(&line)?;

        self.records += 1;
        self.last_path = Some(entry.path.clone());
        Ok(())
    }

    /// Write the completion marker, flush, and move the file into place
    pub fn finish(mut self) -> Result<usize> {
        let marker = format!("{} {}\n", END_DIRECTIVE, self.records);
        self.write_raw(&marker)?;

        let path = self.path;
        let write_err = |source: io::Error| GuardError::Write {
            location: path.clone(),
            source,
        };
        self.sink.close().map_err(write_err)?;
        self.temp
            .persist(&path)
            .map_err(|e| write_err(e.error))?;
        info!(database = %path.display(), records = self.records, "database written");
        Ok(self.records)
    }
}
