use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import, repair and unify vehicle trajectory recordings",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the supported source formats
    Formats,
    /// List the unified output columns with classification and value range
    Columns,
    /// Convert a recording into the unified CSV layout
    Import(ImportArgs),
    /// Convert the first chunk of a recording and show it as a table
    Preview(PreviewArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Source format name (see `formats`)
    #[arg(short = 'f', long = "format")]
    pub format: String,
    /// Primary per-sample file, read in chunks (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Auxiliary files loaded once per import, e.g. `01_recordingMeta.csv`
    #[arg(short = 'a', long = "auxiliary", action = clap::ArgAction::Append)]
    pub auxiliary: Vec<PathBuf>,
    /// Field delimiter of the source files (defaults to the format's own)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the source files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// YAML import profile with chunk size, encoding, delimiter and acceptance
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Source rows per chunk
    #[arg(long = "chunk-rows")]
    pub chunk_rows: Option<usize>,
    /// Delimiter of the unified output (defaults to ',')
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for the output file/stdout (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Keep importing when repairable or fatal rows are reported
    #[arg(long = "accept-corruption")]
    pub accept_corruption: bool,
    /// Write every reported inaccuracy to this JSON file
    #[arg(long = "report")]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
