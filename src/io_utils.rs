//! I/O utilities for reading source files and writing unified CSV.
//!
//! - **Encoding**: input decoding and output transcoding via `encoding_rs`,
//!   defaulting to UTF-8.
//! - **Readers**: [`ChunkReader`] pulls a source file a bounded number of
//!   records at a time; [`read_table`] loads small auxiliary files whole.
//! - **Writers**: `open_csv_writer` targets a file or stdout, transcoding when
//!   a non-UTF-8 output encoding is requested.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::{error::ImportError, table::Table};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_output_delimiter(path: Option<&Path>, provided: Option<u8>, fallback: u8) -> u8 {
    if let Some(delim) = provided {
        return delim;
    }
    if let Some(path) = path {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => return DEFAULT_TSV_DELIMITER,
            Some(ext) if ext.eq_ignore_ascii_case("csv") => return DEFAULT_CSV_DELIMITER,
            _ => {}
        }
    }
    fallback
}

/// Source exports are ragged now and then; short records are padded later.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
) -> Result<csv::Reader<Box<dyn Read>>, ImportError> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        let file = File::open(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Box::new(BufReader::new(file))
    };
    Ok(open_csv_reader(reader, delimiter))
}

pub fn open_csv_writer(
    path: Option<&Path>,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };

    let writer: Box<dyn Write> = if encoding == UTF_8 {
        base
    } else {
        Box::new(TranscodingWriter::new(base, encoding))
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String, ImportError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(ImportError::Decode(encoding.name()))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>, ImportError> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>, ImportError>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    let mut decoded = decode_record(&headers, encoding)?;
    if let Some(first) = decoded.first_mut() {
        // Spreadsheet exports like to start with a byte-order mark.
        *first = first.trim_start_matches('\u{feff}').to_string();
    }
    Ok(decoded)
}

/// Reads a delimited source file a bounded number of records at a time.
pub struct ChunkReader {
    path: PathBuf,
    reader: csv::Reader<Box<dyn Read>>,
    headers: Vec<String>,
    encoding: &'static Encoding,
    record: csv::ByteRecord,
    rows_read: usize,
    exhausted: bool,
}

impl ChunkReader {
    pub fn open(
        path: &Path,
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self, ImportError> {
        let mut reader = open_csv_reader_from_path(path, delimiter)?;
        let headers = reader_headers(&mut reader, encoding)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            headers,
            encoding,
            record: csv::ByteRecord::new(),
            rows_read: 0,
            exhausted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Records consumed so far, excluding the header.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// The next at most `max_rows` records, or `None` once the file is
    /// exhausted.
    pub fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Vec<Vec<String>>>, ImportError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut rows = Vec::with_capacity(max_rows.min(4096));
        while rows.len() < max_rows.max(1) {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.exhausted = true;
                break;
            }
            rows.push(decode_record(&self.record, self.encoding)?);
        }
        self.rows_read += rows.len();
        Ok((!rows.is_empty()).then_some(rows))
    }
}

/// Loads a whole file as a raw-text table.
pub fn read_table(
    path: &Path,
    name: &str,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Table, ImportError> {
    let mut reader = ChunkReader::open(path, delimiter, encoding)?;
    let headers = reader.headers().to_vec();
    let mut rows = Vec::new();
    while let Some(chunk) = reader.next_chunk(usize::MAX)? {
        rows.extend(chunk);
    }
    Ok(Table::from_text_rows(name, headers, rows))
}

struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    buffer: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            buffer: Vec::new(),
        }
    }

    /// Encodes every complete UTF-8 sequence buffered so far. A trailing
    /// partial sequence waits for the next write unless `force` is set.
    fn flush_buffer(&mut self, force: bool) -> io::Result<()> {
        let valid_up_to = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(err) if err.error_len().is_some() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid UTF-8 sequence in output stream",
                ));
            }
            Err(err) => err.valid_up_to(),
        };
        if valid_up_to > 0 {
            let pending: Vec<u8> = self.buffer.drain(..valid_up_to).collect();
            let text = String::from_utf8(pending)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.encode_and_write(&text)?;
        }
        if force && !self.buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete UTF-8 sequence at end of output stream",
            ));
        }
        Ok(())
    }

    fn encode_and_write(&mut self, text: &str) -> io::Result<()> {
        let (encoded, _output_encoding, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(encoded.as_ref())
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.flush_buffer(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer(true)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use encoding_rs::WINDOWS_1252;
    use tempfile::NamedTempFile;

    use super::*;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn chunks_are_bounded_and_exhaust_cleanly() {
        let file = file_with(b"a,b\n1,2\n3,4\n5,6\n");
        let mut reader = ChunkReader::open(file.path(), b',', UTF_8).unwrap();
        assert_eq!(reader.headers(), ["a", "b"]);
        assert_eq!(reader.next_chunk(2).unwrap().unwrap().len(), 2);
        assert_eq!(reader.next_chunk(2).unwrap().unwrap(), vec![vec!["5", "6"]]);
        assert_eq!(reader.rows_read(), 3);
        assert!(reader.next_chunk(2).unwrap().is_none());
    }

    #[test]
    fn legacy_encodings_decode() {
        let file = file_with(b"name;city\nJ\xfcrgen;K\xf6ln\n");
        let table = read_table(file.path(), "t", b';', WINDOWS_1252).unwrap();
        assert_eq!(table.display_row(0), vec!["Jürgen", "Köln"]);
        assert!(matches!(
            read_table(file.path(), "t", b';', UTF_8),
            Err(ImportError::Decode("UTF-8"))
        ));
    }

    #[test]
    fn byte_order_mark_is_stripped_from_headers() {
        let file = file_with(b"\xef\xbb\xbflat,lon\n1,2\n");
        let table = read_table(file.path(), "t", b',', UTF_8).unwrap();
        assert!(table.has_column("lat"));
    }

    #[test]
    fn transcoding_writer_handles_split_sequences() {
        let mut writer = TranscodingWriter::new(Vec::new(), WINDOWS_1252);
        let bytes = "Köln".as_bytes();
        writer.write_all(&bytes[..2]).unwrap();
        writer.write_all(&bytes[2..]).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.inner, b"K\xf6ln");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ChunkReader::open(Path::new("/no/such/file.csv"), b',', UTF_8).err().unwrap();
        assert!(matches!(err, ImportError::Io { .. }));
    }
}
