use super::codec::{
    self, Field, Header, HeaderError, COMMENT_PREFIX, DELIMITER, DIRECTIVE_PREFIX, END_DIRECTIVE,
    FORMAT_VERSION,
};
use super::location::DatabaseLocation;
use crate::attributes::AttrSet;
use crate::entry::{AttributeStateTree, Entry, Origin};
use crate::error::{GuardError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

/// Streaming reader over one database
pub struct DatabaseReader {
    path: PathBuf,
    input: Box<dyn BufRead + Send>,
    header: Header,
    line_no: usize,
    records: usize,
    last_path: Option<String>,
    finished: bool,
    buf: String,
}

impl std::fmt::Debug for DatabaseReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("line_no", &self.line_no)
            .field("records", &self.records)
            .field("finished", &self.finished)
            .finish()
    }
}

impl DatabaseReader {
    /// Open a database and consume everything up to and including its header
    pub fn open(location: &DatabaseLocation) -> Result<Self> {
        let file = File::open(&location.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => GuardError::DatabaseNotFound(location.path.clone()),
            _ => GuardError::io(&location.path, e),
        })?;
        let input: Box<dyn BufRead + Send> = if location.compressed {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::from_reader(location.path.clone(), input)
    }

    fn from_reader(path: PathBuf, input: Box<dyn BufRead + Send>) -> Result<Self> {
        let mut reader = Self {
            path,
            input,
            header: Header {
                version: FORMAT_VERSION,
                fields: Vec::new(),
            },
            line_no: 0,
            records: 0,
            last_path: None,
            finished: false,
            buf: String::new(),
        };
        reader.read_header()?;
        debug!(
            database = %reader.path.display(),
            header = %reader.header,
            "opened database"
        );
        Ok(reader)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn records_read(&self) -> usize {
        self.records
    }

    fn format_error(&self, message: impl Into<String>) -> GuardError {
        GuardError::Format {
            location: self.path.clone(),
            line: self.line_no,
            message: message.into(),
        }
    }

    /// Next significant line (comments and blank lines skipped), or `None`
    /// at physical end of stream
    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            self.buf.clear();
            let n = self.input.read_line(&mut self.buf).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => GuardError::UnexpectedEof {
                    location: self.path.clone(),
                    line: self.line_no,
                },
                io::ErrorKind::InvalidData => self.format_error("line is not valid UTF-8"),
                _ => GuardError::io(&self.path, e),
            })?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.strip_suffix('\n').unwrap_or(&self.buf);
            if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }

    fn read_header(&mut self) -> Result<()> {
        let line = self.next_line()?.ok_or_else(|| GuardError::UnexpectedEof {
            location: self.path.clone(),
            line: self.line_no,
        })?;
        self.header = Header::parse(&line).map_err(|e| match e {
            HeaderError::Version(found) => GuardError::VersionMismatch {
                location: self.path.clone(),
                found,
                expected: FORMAT_VERSION,
            },
            HeaderError::Malformed(message) => self.format_error(message),
        })?;
        Ok(())
    }

    /// Read the next record, `Ok(None)` once the completion marker was seen
    pub fn read_next(&mut self) -> Result<Option<Entry>> {
        if self.finished {
            return Ok(None);
        }
        let line = match self.next_line()? {
            Some(line) => line,
            None => {
                return Err(GuardError::UnexpectedEof {
                    location: self.path.clone(),
                    line: self.line_no,
                })
            }
        };
        if line.starts_with(DIRECTIVE_PREFIX) {
            self.read_end_marker(&line)?;
            return Ok(None);
        }
        let entry = self.decode_record(&line)?;
        self.records += 1;
        Ok(Some(entry))
    }

    fn read_end_marker(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split_whitespace();
        if parts.next() != Some(END_DIRECTIVE) {
            return Err(self.format_error(format!("unexpected directive '{}'", line)));
        }
        let count: usize = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| self.format_error("completion marker without record count"))?;
        if count != self.records {
            return Err(self.format_error(format!(
                "completion marker counts {} records, read {}",
                count, self.records
            )));
        }
        self.finished = true;
        if self.next_line()?.is_some() {
            return Err(self.format_error("data after completion marker"));
        }
        Ok(())
    }

    fn decode_record(&mut self, line: &str) -> Result<Entry> {
        let raw: Vec<&str> = line.split(DELIMITER).collect();
        if raw.len() != self.header.fields.len() {
            return Err(self.format_error(format!(
                "expected {} fields, found {}",
                self.header.fields.len(),
                raw.len()
            )));
        }

        let path = codec::unescape(raw[0]).map_err(|m| self.format_error(m))?;
        if !path.starts_with('/') {
            return Err(self.format_error(format!("'{}' is not an absolute path", path)));
        }
        if let Some(last) = &self.last_path {
            if path.as_str() <= last.as_str() {
                return Err(self.format_error(format!(
                    "'{}' is out of order or duplicated (after '{}')",
                    path, last
                )));
            }
        }

        let mut entry = Entry::new(path.clone(), Origin::Database);
        let mut requested = None;
        for (field, value) in self.header.fields.iter().zip(raw.iter()).skip(1) {
            if value.is_empty() {
                continue;
            }
            match field {
                Field::Path => {}
                Field::Attr => {
                    let bits = u64::from_str_radix(value, 16).map_err(|_| {
                        self.format_error(format!("invalid attribute mask '{}'", value))
                    })?;
                    requested = Some(AttrSet::from_bits(bits));
                }
                Field::Value(attr) => {
                    let decoded =
                        codec::decode_value(*attr, value).map_err(|m| self.format_error(m))?;
                    entry.set(*attr, decoded);
                }
            }
        }
        entry.requested = requested.unwrap_or_else(|| entry.captured());
        self.last_path = Some(path);
        Ok(entry)
    }

    /// Drain the reader into a tree
    pub fn read_all(mut self) -> Result<AttributeStateTree> {
        let mut tree = AttributeStateTree::new();
        while let Some(entry) = self.read_next()? {
            tree.insert(entry);
        }
        debug!(database = %self.path.display(), records = self.records, "database loaded");
        Ok(tree)
    }
}

impl Iterator for DatabaseReader {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
