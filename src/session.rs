//! The chunked import protocol.
//!
//! An [`ImportSession`] wraps one converter for one user-initiated import:
//!
//! 1. `open` resolves the format, loads the always-resident auxiliary files
//!    and starts the converter session.
//! 2. `import_chunks` returns a lazy [`ChunkImport`] over the primary file.
//!    Every item is one chunk: `Some(table)` when it converted, `None` when
//!    it failed validation. The iterator ends when the file is exhausted.
//! 3. `close` ends the converter session.
//!
//! Inaccuracies are appended to a caller-owned list, each prefixed with the
//! chunk number and the 0-based range of source records it covers. Row
//! numbers inside a message are relative to the chunk.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use regex::Regex;

use crate::{
    converter::{Converter, TableLayout, TableRole},
    error::ImportError,
    formats::FormatRegistry,
    io_utils::{ChunkReader, read_table},
    table::{SourceSet, Table},
};

pub const DEFAULT_CHUNK_ROWS: usize = 50_000;

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub chunk_rows: usize,
    pub encoding: &'static Encoding,
    /// Overrides the format's own separator.
    pub delimiter: Option<u8>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_rows: DEFAULT_CHUNK_ROWS,
            encoding: UTF_8,
            delimiter: None,
        }
    }
}

fn recording_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)_(.+)$").expect("file name pattern is valid"))
}

/// Splits a `<n>_<suffix>` file stem into its recording number and suffix.
pub fn split_recording_name(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?;
    let captures = recording_file_pattern().captures(stem)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

fn role_for<'a>(layout: &'a TableLayout, suffix: &str) -> Option<&'a TableRole> {
    layout
        .auxiliary
        .iter()
        .find(|role| role.file_suffix == Some(suffix))
}

struct OpenSession {
    converter: Box<dyn Converter>,
    layout: TableLayout,
    recording: Option<String>,
    auxiliary: Vec<Table>,
}

pub struct ImportSession {
    registry: FormatRegistry,
    options: SessionOptions,
    open: Option<OpenSession>,
}

impl Default for ImportSession {
    fn default() -> Self {
        Self::new(FormatRegistry::default(), SessionOptions::default())
    }
}

impl ImportSession {
    pub fn new(registry: FormatRegistry, options: SessionOptions) -> Self {
        Self {
            registry,
            options,
            open: None,
        }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Name of the format of the open session.
    pub fn format(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.converter.name())
    }

    pub fn open(&mut self, always_imported: &[PathBuf], format: &str) -> Result<(), ImportError> {
        let mut converter = self.registry.create(format)?;
        if self.open.is_some() {
            return Err(ImportError::SessionAlreadyOpen);
        }
        let layout = converter.layout();
        let delimiter = self.options.delimiter.unwrap_or(converter.get_separator());

        let mut recording: Option<String> = None;
        let mut matched: Vec<(&TableRole, &PathBuf)> = Vec::new();
        for path in always_imported {
            let Some((number, suffix)) = split_recording_name(path) else {
                return Err(ImportError::Structural(format!(
                    "{path:?} does not follow the <n>_<table> naming of format '{format}'"
                )));
            };
            let Some(role) = role_for(&layout, &suffix) else {
                return Err(ImportError::Structural(format!(
                    "{path:?} is not an auxiliary file of format '{format}'"
                )));
            };
            match &recording {
                Some(expected) if *expected != number => {
                    return Err(ImportError::Structural(format!(
                        "{path:?} belongs to recording {number}, expected {expected}"
                    )));
                }
                Some(_) => {}
                None => recording = Some(number),
            }
            if matched.iter().any(|(seen, _)| seen.name == role.name) {
                return Err(ImportError::Structural(format!(
                    "more than one '{}' file supplied",
                    role.name
                )));
            }
            matched.push((role, path));
        }
        let missing = layout
            .auxiliary
            .iter()
            .filter(|role| !matched.iter().any(|(seen, _)| seen.name == role.name))
            .map(|role| role.name)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ImportError::Structural(format!(
                "format '{format}' requires the auxiliary file(s): {}",
                missing.join(", ")
            )));
        }

        let mut auxiliary = Vec::with_capacity(matched.len());
        for (role, path) in matched {
            let table = read_table(path, role.name, delimiter, self.options.encoding)?;
            debug!(
                "Loaded auxiliary table '{}' with {} row(s) from {path:?}",
                role.name,
                table.row_count()
            );
            auxiliary.push(table);
        }

        converter.open_session();
        info!("Opened '{format}' import session");
        self.open = Some(OpenSession {
            converter,
            layout,
            recording,
            auxiliary,
        });
        Ok(())
    }

    pub fn import_chunks<'a>(
        &'a mut self,
        chunked: &Path,
        inaccuracies: &'a mut Vec<String>,
    ) -> Result<ChunkImport<'a>, ImportError> {
        let chunk_rows = self.options.chunk_rows.max(1);
        let delimiter_override = self.options.delimiter;
        let encoding = self.options.encoding;
        let open = self.open.as_mut().ok_or(ImportError::SessionNotOpen)?;

        if let Some(suffix) = open.layout.primary.file_suffix {
            match split_recording_name(chunked) {
                Some((number, found)) if found == suffix => {
                    if let Some(expected) = &open.recording
                        && *expected != number
                    {
                        return Err(ImportError::Structural(format!(
                            "{chunked:?} belongs to recording {number}, expected {expected}"
                        )));
                    }
                }
                _ => {
                    return Err(ImportError::Structural(format!(
                        "{chunked:?} does not match <n>_{suffix}"
                    )));
                }
            }
        }

        let delimiter = delimiter_override.unwrap_or(open.converter.get_separator());
        let reader = ChunkReader::open(chunked, delimiter, encoding)?;
        info!(
            "Importing {chunked:?} in chunks of {chunk_rows} row(s) as '{}'",
            open.converter.name()
        );
        Ok(ChunkImport {
            session: open,
            reader,
            chunk_rows,
            inaccuracies,
            chunk: 0,
            done: false,
        })
    }

    pub fn close(&mut self) -> Result<(), ImportError> {
        let mut open = self.open.take().ok_or(ImportError::SessionNotOpen)?;
        open.converter.close_session();
        info!("Closed '{}' import session", open.converter.name());
        Ok(())
    }
}

/// Lazy, single-pass iterator over the converted chunks of one file.
pub struct ChunkImport<'a> {
    session: &'a mut OpenSession,
    reader: ChunkReader,
    chunk_rows: usize,
    inaccuracies: &'a mut Vec<String>,
    chunk: usize,
    done: bool,
}

impl ChunkImport<'_> {
    /// Chunks produced so far.
    pub fn chunks(&self) -> usize {
        self.chunk
    }

    /// Everything reported so far, including what the list held before.
    pub fn inaccuracies(&self) -> &[String] {
        self.inaccuracies
    }

    fn convert(&mut self, rows: Vec<Vec<String>>) -> Result<Option<Table>, ImportError> {
        let first = self.reader.rows_read() - rows.len();
        let last = self.reader.rows_read().saturating_sub(1);
        let prefix = format!("Chunk {} (rows {first}-{last})", self.chunk);

        let primary = Table::from_text_rows(
            self.session.layout.primary.name,
            self.reader.headers().to_vec(),
            rows,
        );
        let mut source = SourceSet::new(primary);
        for table in &self.session.auxiliary {
            source.insert(table.clone());
        }

        let converter = &mut self.session.converter;
        let convertible = converter.is_convertable(&source);
        let messages = converter.search_inaccuracies(&source)?;
        self.inaccuracies
            .extend(messages.into_iter().map(|message| format!("{prefix}: {message}")));
        if !convertible {
            warn!("{prefix} of {:?} is not convertible", self.reader.path());
            return Ok(None);
        }
        let table = converter.convert_to_data(&mut source)?;
        debug!("{prefix} converted into {} row(s)", table.row_count());
        Ok(Some(table))
    }
}

impl Iterator for ChunkImport<'_> {
    type Item = Result<Option<Table>, ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let rows = match self.reader.next_chunk(self.chunk_rows) {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        self.chunk += 1;
        let result = self.convert(rows);
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}
