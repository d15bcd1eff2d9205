//! CSV ingestion and microdata output, following `common/data.rs`'s plain
//! `CsvReader::new(file).finish()` idiom for reading and `polars`'s
//! `CsvWriter` for writing the synthetic output table.

use std::fs::File;
use std::path::Path;

use polars::io::SerReader;
use polars::prelude::{Column, CsvReader, CsvWriter, DataFrame, SerWriter, Series};

use crate::error::EngineError;
use crate::microdata::SyntheticRecord;
use crate::tree::RawRecord;

/// Reads the raw input table and turns each row into a `RawRecord`. Fails
/// with `InputError` if a declared column is absent or a cell in one is
/// null.
pub fn read_records(path: &Path, geo_columns: &[String], query_columns: &[String]) -> Result<Vec<RawRecord>, EngineError> {
    let file = File::open(path).map_err(|e| {
        EngineError::input("io.read_records", path.display().to_string(), format!("failed to open input file: {e}"))
    })?;
    let df = CsvReader::new(file)
        .finish()
        .map_err(|e| EngineError::input("io.read_records", path.display().to_string(), format!("failed to parse CSV: {e}")))?;

    let geo_series: Vec<Vec<String>> =
        geo_columns.iter().map(|c| column_as_strings(&df, c, path)).collect::<Result<_, _>>()?;
    let query_series: Vec<Vec<String>> =
        query_columns.iter().map(|c| column_as_strings(&df, c, path)).collect::<Result<_, _>>()?;

    let n = df.height();
    let mut records = Vec::with_capacity(n);
    for row in 0..n {
        records.push(RawRecord {
            geo: geo_series.iter().map(|col| col[row].clone()).collect(),
            query: query_series.iter().map(|col| col[row].clone()).collect(),
        });
    }
    Ok(records)
}

fn column_as_strings(df: &DataFrame, name: &str, path: &Path) -> Result<Vec<String>, EngineError> {
    let phase = "io.read_records";
    let series = df
        .column(name)
        .map_err(|_| EngineError::input(phase, path.display().to_string(), format!("missing declared column '{name}'")))?;
    let strings = series
        .cast(&polars::prelude::DataType::String)
        .map_err(|e| EngineError::input(phase, path.display().to_string(), format!("column '{name}': {e}")))?;
    let chunked = strings
        .str()
        .map_err(|e| EngineError::input(phase, path.display().to_string(), format!("column '{name}': {e}")))?;

    chunked
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.map(str::to_string).ok_or_else(|| {
                EngineError::input(phase, path.display().to_string(), format!("row {row}, column '{name}' is missing a value"))
            })
        })
        .collect()
}

/// Writes the synthetic individual records as a CSV whose columns are the
/// geographic attributes followed by the query attributes.
pub fn write_microdata(
    path: &Path,
    geo_columns: &[String],
    query_columns: &[String],
    records: &[SyntheticRecord],
) -> Result<(), EngineError> {
    let phase = "io.write_microdata";
    let mut columns = Vec::with_capacity(geo_columns.len() + query_columns.len());
    for (i, name) in geo_columns.iter().enumerate() {
        let values: Vec<String> = records.iter().map(|r| r.geo[i].clone()).collect();
        columns.push(Column::from(Series::new(name.as_str().into(), values)));
    }
    for (i, name) in query_columns.iter().enumerate() {
        let values: Vec<String> = records.iter().map(|r| r.query[i].clone()).collect();
        columns.push(Column::from(Series::new(name.as_str().into(), values)));
    }

    let mut df = DataFrame::new(columns).map_err(|e| EngineError::state(phase, e.to_string()))?;
    let file = File::create(path)
        .map_err(|e| EngineError::state(phase, format!("failed to create {}: {e}", path.display())))?;
    CsvWriter::new(file).finish(&mut df).map_err(|e| EngineError::state(phase, e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_geo_and_query_columns_row_by_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "region,county,sex").unwrap();
        writeln!(f, "R1,C1,M").unwrap();
        writeln!(f, "R1,C2,F").unwrap();
        drop(f);

        let records = read_records(&path, &["region".to_string(), "county".to_string()], &["sex".to_string()]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].geo, vec!["R1".to_string(), "C1".to_string()]);
        assert_eq!(records[0].query, vec!["M".to_string()]);
        assert_eq!(records[1].geo, vec!["R1".to_string(), "C2".to_string()]);
    }

    #[test]
    fn missing_column_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "region,sex").unwrap();
        writeln!(f, "R1,M").unwrap();
        drop(f);

        let err = read_records(&path, &["region".to_string(), "county".to_string()], &["sex".to_string()]);
        assert!(matches!(err, Err(EngineError::Input { .. })));
    }

    #[test]
    fn writes_a_row_per_synthetic_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.csv");
        let records = vec![
            SyntheticRecord { geo: vec!["R1".into()], query: vec!["M".into()] },
            SyntheticRecord { geo: vec!["R1".into()], query: vec!["F".into()] },
        ];
        write_microdata(&path, &["region".to_string()], &["sex".to_string()], &records).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }
}
