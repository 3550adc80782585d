use std::io;
use std::path::PathBuf;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use csv::{QuoteStyle, Writer, WriterBuilder};
use polars::prelude::{DataFrame, DataType, IpcReader, IpcWriter, SerReader, SerWriter, TakeRandom};

use crate::error::WildsimError::ColumnNotFoundError;
use crate::structs::TableCollection;

pub fn get_input(filename: Option<PathBuf>) -> Result<Box<dyn io::Read>> {
    let input: Box<dyn io::Read> = match filename {
        Some(name) => match name.to_str() {
            Some("-") => Box::new(io::stdin()),
            Some(name) => {
                let r = match niffler::from_path(name) {
                    Ok(x) => x.0,
                    Err(err) => {
                        let msg = format!("failed to open \"{name}\": {err}");
                        return Err(eyre!(msg))?;
                    }
                };
                Box::new(r)
            }
            None => return Err(eyre!("Unknown I/O error")),
        },
        None => Box::new(io::stdin()),
    };
    Ok(input)
}

pub fn get_output(filename: Option<PathBuf>) -> Result<Box<dyn io::Write>> {
    let output: Box<dyn io::Write> = match filename {
        Some(name) => match name.to_str() {
            Some("-") => Box::new(io::stdout()),
            Some(name) => Box::new(
                match std::fs::File::options()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(name)
                {
                    Ok(x) => x,
                    Err(err) => return Err(eyre!("failed to open \"{name}\": {err}"))?,
                },
            ),
            None => return Err(eyre!("Unknown I/O error")),
        },
        None => Box::new(io::stdout()),
    };
    Ok(output)
}

pub fn get_csv_writer<W: io::Write>(output: W) -> Writer<W> {
    WriterBuilder::new()
        .delimiter(b',')
        .has_headers(false)
        .flexible(true)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(output)
}

pub fn open_csv_writer(name: PathBuf) -> Result<Writer<Box<dyn io::Write>>> {
    Ok(get_csv_writer(get_output(Some(name))?))
}

/// Read the tree-sequence tables written by the forward simulator.
/// The file is JSON, transparently decompressed if gzipped.
pub fn read_tables(path: &PathBuf) -> Result<TableCollection> {
    let input = get_input(Some(path.clone()))?;
    let tables: TableCollection = serde_json::from_reader(input)
        .wrap_err_with(|| format!("failed to parse tree-sequence tables from {path:?}"))?;
    Ok(tables)
}

pub fn write_tables(path: &PathBuf, tables: &TableCollection) -> Result<()> {
    let output = get_output(Some(path.clone()))?;
    serde_json::to_writer(output, tables)
        .wrap_err_with(|| format!("failed to write tree-sequence tables to {path:?}"))?;
    Ok(())
}

/// Read a feather/IPC table, e.g. the prior-parameter table of a sweep.
pub fn read_feather(path: &PathBuf) -> Result<DataFrame> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("failed to open prior table {path:?}"))?;
    let df = IpcReader::new(file).finish()?;
    Ok(df)
}

pub fn write_feather(path: &PathBuf, df: &mut DataFrame) -> Result<()> {
    let file = std::fs::File::create(path)
        .wrap_err_with(|| format!("failed to create output table {path:?}"))?;
    IpcWriter::new(file).finish(df)?;
    Ok(())
}

/// Fetch one cell as f64, casting integer columns transparently.
pub fn column_f64(df: &DataFrame, name: &str, row: usize) -> Result<f64> {
    let series = df
        .column(name)
        .map_err(|_| eyre!(ColumnNotFoundError(name.to_string())))?;
    let value = series
        .cast(&DataType::Float64)?
        .f64()?
        .get(row)
        .ok_or_else(|| eyre!("null value in column {name:?} at row {row}"))?;
    Ok(value)
}
