pub mod calculator;
pub mod cli;
pub mod column;
pub mod config;
pub mod converter;
pub mod data;
pub mod error;
pub mod formats;
pub mod geo;
pub mod import;
pub mod io_utils;
pub mod kinematics;
pub mod preview;
pub mod render;
pub mod repair;
pub mod session;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands},
    column::Column,
    formats::FormatRegistry,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("trajectory_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Formats => handle_formats(),
        Commands::Columns => handle_columns(),
        Commands::Import(args) => import::execute(&args),
        Commands::Preview(args) => preview::execute(&args),
    }
}

fn handle_formats() -> Result<()> {
    let registry = FormatRegistry::default();
    let mut rows = Vec::new();
    for name in registry.names() {
        let converter = registry.create(name)?;
        let layout = converter.layout();
        let files = layout
            .roles()
            .map(|role| match role.file_suffix {
                Some(suffix) => format!("<n>_{suffix}"),
                None => role.name.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        rows.push(vec![
            name.to_string(),
            printable_delimiter(converter.get_separator()),
            files,
        ]);
    }
    print!(
        "{}",
        render::render_table(
            &["format".into(), "separator".into(), "files".into()],
            &rows
        )
    );
    info!("Listed {} format(s)", rows.len());
    Ok(())
}

fn handle_columns() -> Result<()> {
    let rows = Column::ALL
        .iter()
        .map(|column| {
            vec![
                column.name().to_string(),
                column.classification().to_string(),
                column
                    .value_range()
                    .map(|range| range.to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    print!(
        "{}",
        render::render_table(
            &["column".into(), "classification".into(), "range".into()],
            &rows
        )
    );
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
