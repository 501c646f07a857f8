//! The `import` command: drives an [`ImportSession`] over one recording and
//! streams the unified chunks into a CSV writer.
//!
//! Whether reported inaccuracies abort the import is up to an
//! [`ImportPrompt`]. A chunk that cannot be converted at all always aborts.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde::Serialize;

use crate::{
    cli::{ImportArgs, SourceArgs},
    column::{Column, column_names},
    config::ImportProfile,
    io_utils,
    session::{DEFAULT_CHUNK_ROWS, ImportSession, SessionOptions},
    table::Table,
};

/// The user-facing side of an import.
pub trait ImportPrompt {
    /// Shows the inaccuracies reported for one chunk.
    fn report_warnings(&mut self, chunk: usize, warnings: &[String]);

    /// Whether to keep the chunk despite `warnings`.
    fn accept_corruption(&mut self, warnings: &[String]) -> bool;
}

/// Logs warnings and answers every acceptance question the same way.
#[derive(Debug, Clone, Copy)]
pub struct LogPrompt {
    pub accept: bool,
}

impl ImportPrompt for LogPrompt {
    fn report_warnings(&mut self, chunk: usize, warnings: &[String]) {
        warn!("{} inaccuracy(ies) in chunk {chunk}", warnings.len());
        for warning in warnings {
            warn!("{warning}");
        }
    }

    fn accept_corruption(&mut self, _warnings: &[String]) -> bool {
        self.accept
    }
}

/// Writes unified tables as one CSV stream. The `order` column continues
/// across chunks.
pub struct UnifiedWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
    header_written: bool,
}

impl<W: Write> UnifiedWriter<W> {
    pub fn new(writer: csv::Writer<W>) -> Self {
        Self {
            writer,
            rows: 0,
            header_written: false,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.header_written {
            self.writer
                .write_record(column_names())
                .context("Writing output header")?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn write_table(&mut self, table: &Table) -> Result<()> {
        self.write_header()?;
        let order = table.column_index(Column::Order.name());
        for row in 0..table.row_count() {
            let mut fields = table.display_row(row);
            if let Some(idx) = order {
                fields[idx] = (self.rows + row).to_string();
            }
            self.writer
                .write_record(&fields)
                .with_context(|| format!("Writing output row {}", self.rows + row))?;
        }
        self.rows += table.row_count();
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.write_header()?;
        self.writer
            .into_inner()
            .map_err(|err| anyhow!("Flushing output: {}", err.error()))
    }
}

/// Chunks and rows that made it into the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportTally {
    pub chunks: usize,
    pub rows: usize,
}

/// Written by `import --report`, also when the import aborted.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport<'a> {
    pub format: &'a str,
    pub input: &'a Path,
    pub completed: bool,
    pub chunks: usize,
    pub rows: usize,
    pub inaccuracies: &'a [String],
}

/// Opens a session, converts every chunk and hands it to `sink`. The
/// session is closed again whatever the outcome; `inaccuracies` keeps what
/// was reported up to that point.
pub fn convert_recording<F>(
    session: &mut ImportSession,
    source: &SourceArgs,
    prompt: &mut dyn ImportPrompt,
    inaccuracies: &mut Vec<String>,
    sink: F,
) -> Result<ImportTally>
where
    F: FnMut(Table) -> Result<()>,
{
    session
        .open(&source.auxiliary, &source.format)
        .with_context(|| format!("Opening '{}' import", source.format))?;
    let outcome = drain_chunks(session, source, prompt, sink, inaccuracies);
    session.close()?;
    outcome
}

fn drain_chunks<F>(
    session: &mut ImportSession,
    source: &SourceArgs,
    prompt: &mut dyn ImportPrompt,
    mut sink: F,
    inaccuracies: &mut Vec<String>,
) -> Result<ImportTally>
where
    F: FnMut(Table) -> Result<()>,
{
    let mut chunks = session
        .import_chunks(&source.input, inaccuracies)
        .with_context(|| format!("Reading {:?}", source.input))?;
    let mut reported = 0usize;
    let mut rows = 0usize;
    while let Some(item) = chunks.next() {
        let chunk = chunks.chunks();
        let converted = item.with_context(|| format!("Converting chunk {chunk}"))?;
        let fresh = chunks.inaccuracies()[reported..].to_vec();
        reported += fresh.len();
        if !fresh.is_empty() {
            prompt.report_warnings(chunk, &fresh);
        }
        let Some(table) = converted else {
            return Err(anyhow!(
                "Chunk {chunk} of {:?} cannot be converted to '{}'",
                source.input,
                source.format
            ));
        };
        if !fresh.is_empty() && !prompt.accept_corruption(&fresh) {
            return Err(anyhow!(
                "Import aborted: {} inaccuracy(ies) in chunk {chunk} were not accepted",
                fresh.len()
            ));
        }
        rows += table.row_count();
        sink(table)?;
    }
    Ok(ImportTally {
        chunks: chunks.chunks(),
        rows,
    })
}

/// Session options and acceptance from the profile, overridden by flags.
pub fn resolve_options(args: &ImportArgs) -> Result<(SessionOptions, bool)> {
    let profile = match &args.config {
        Some(path) => ImportProfile::load(path)?,
        None => ImportProfile::default(),
    };
    let encoding = io_utils::resolve_encoding(
        args.source
            .input_encoding
            .as_deref()
            .or(profile.encoding.as_deref()),
    )?;
    let options = SessionOptions {
        chunk_rows: args
            .chunk_rows
            .or(profile.chunk_rows)
            .unwrap_or(DEFAULT_CHUNK_ROWS)
            .max(1),
        encoding,
        delimiter: args.source.delimiter.or(profile.delimiter_byte()?),
    };
    let accept = args.accept_corruption || profile.accept_corruption.unwrap_or(false);
    Ok((options, accept))
}

fn write_report(path: &Path, report: &ImportReport<'_>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating report {path:?}"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("Writing report {path:?}"))
}

pub fn execute(args: &ImportArgs) -> Result<()> {
    let (options, accept) = resolve_options(args)?;
    let output_path = args.output.as_deref();
    let output_delimiter = io_utils::resolve_output_delimiter(
        output_path,
        args.output_delimiter,
        io_utils::DEFAULT_CSV_DELIMITER,
    );
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    info!(
        "Importing '{}' as '{}' -> {} (delimiter '{}', chunks of {} row(s))",
        args.source.input.display(),
        args.source.format,
        output_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".into()),
        crate::printable_delimiter(output_delimiter),
        options.chunk_rows
    );

    let mut writer = UnifiedWriter::new(io_utils::open_csv_writer(
        output_path,
        output_delimiter,
        output_encoding,
    )?);
    let mut session = ImportSession::new(Default::default(), options);
    let mut prompt = LogPrompt { accept };
    let mut inaccuracies = Vec::new();
    let result = convert_recording(
        &mut session,
        &args.source,
        &mut prompt,
        &mut inaccuracies,
        |table| writer.write_table(&table),
    );
    let rows = writer.rows_written();
    let finished = result.and_then(|tally| {
        writer.finish()?.flush().context("Flushing output")?;
        Ok(tally)
    });

    if let Some(path) = &args.report {
        let tally = finished.as_ref().copied().unwrap_or(ImportTally {
            chunks: 0,
            rows,
        });
        write_report(
            path,
            &ImportReport {
                format: &args.source.format,
                input: &args.source.input,
                completed: finished.is_ok(),
                chunks: tally.chunks,
                rows: tally.rows,
                inaccuracies: &inaccuracies,
            },
        )?;
    }
    let tally = finished?;
    info!(
        "Imported {} row(s) in {} chunk(s) with {} inaccuracy(ies)",
        tally.rows,
        tally.chunks,
        inaccuracies.len()
    );
    Ok(())
}
