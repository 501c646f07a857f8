use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::{
    cli::PreviewArgs,
    io_utils, render,
    session::{ImportSession, SessionOptions},
};

/// Converts only the first chunk and prints its leading rows. Reported
/// inaccuracies are logged and never stop the preview.
pub fn execute(args: &PreviewArgs) -> Result<()> {
    let options = SessionOptions {
        encoding: io_utils::resolve_encoding(args.source.input_encoding.as_deref())?,
        delimiter: args.source.delimiter,
        ..SessionOptions::default()
    };
    let mut session = ImportSession::new(Default::default(), options);
    session
        .open(&args.source.auxiliary, &args.source.format)
        .with_context(|| format!("Opening '{}' preview", args.source.format))?;

    let mut inaccuracies = Vec::new();
    let first = session
        .import_chunks(&args.source.input, &mut inaccuracies)
        .with_context(|| format!("Reading {:?}", args.source.input))
        .and_then(|mut chunks| chunks.next().transpose().map_err(Into::into));
    session.close()?;
    for message in &inaccuracies {
        warn!("{message}");
    }

    match first? {
        None => info!("{:?} holds no rows", args.source.input),
        Some(None) => {
            return Err(anyhow!(
                "{:?} cannot be converted to '{}'",
                args.source.input,
                args.source.format
            ));
        }
        Some(Some(table)) => {
            print!("{}", render::render_unified(&table, args.rows));
            info!(
                "Displayed {} of {} converted row(s) from {:?}",
                table.row_count().min(args.rows),
                table.row_count(),
                args.source.input
            );
        }
    }
    Ok(())
}
