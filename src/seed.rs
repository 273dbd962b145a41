//! Purpose: Build the startup `Database` from schema files, table names, and seed data.
//! Exports: `Bootstrap`, `build_database`, `read_seed`, `read_schemas`.
//! Role: Shared by `serve` and `check` so both see exactly the same registry.
//! Invariants: A seed file maps table name -> array of records; a seed dir holds `<table>.json` arrays.
//! Invariants: Directory entries load in file-name order; non-`.json` files are ignored.
//! Invariants: Each seeded table receives exactly one `load` call.
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use sproutdb::api::{Database, Error, ErrorKind, Record, Schema, Table, record_from_json};

#[derive(Clone, Debug, Default)]
pub(crate) struct Bootstrap {
    pub seed: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub tables: Vec<String>,
}

pub(crate) fn build_database(config: &Bootstrap) -> Result<Database, Error> {
    let db = Database::new();

    if let Some(path) = &config.schema {
        for (name, schema) in read_schemas(path)? {
            db.register(&name, Table::with_validator(schema))?;
        }
    }

    for name in &config.tables {
        db.ensure_table(name)?;
    }

    if let Some(path) = &config.seed {
        for (name, records) in read_seed(path)? {
            let count = records.len();
            let table = db.ensure_table(&name)?;
            table.load(records).map_err(|err| {
                err.with_hint(format!("Seed data for table '{name}' was rejected by its schema."))
                    .with_path(path)
            })?;
            debug!(table = %name, records = count, "seeded table");
        }
        info!(
            tables = db.len(),
            records = db.total_records(),
            seed = %path.display(),
            "seed data loaded"
        );
    }

    Ok(db)
}

pub(crate) fn read_seed(path: &Path) -> Result<Vec<(String, Vec<Record>)>, Error> {
    let meta = fs::metadata(path).map_err(|err| {
        let kind = if err.kind() == std::io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Io
        };
        Error::new(kind)
            .with_message("seed file or folder not found")
            .with_path(path)
            .with_source(err)
    })?;

    if !meta.is_dir() {
        let value = read_json(path)?;
        let Value::Object(tables) = value else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("seed file must be a JSON object mapping table name to records")
                .with_path(path)
                .with_hint(r#"Example: {"users": [{"id": 1, "name": "Alice"}]}"#));
        };
        return tables
            .into_iter()
            .map(|(name, records)| records_from(records, path, &name).map(|records| (name, records)))
            .collect();
    }

    let mut files = Vec::new();
    let entries = fs::read_dir(path).map_err(|err| io_error(err, "failed to read seed folder", path))?;
    for entry in entries {
        let entry = entry.map_err(|err| io_error(err, "failed to read seed folder", path))?;
        let file = entry.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
            files.push(file);
        }
    }
    files.sort();

    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let Some(name) = file.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let name = name.to_string();
        let records = records_from(read_json(&file)?, &file, &name)?;
        out.push((name, records));
    }
    Ok(out)
}

/// Reads a JSON object mapping table name -> schema.
pub(crate) fn read_schemas(path: &Path) -> Result<Vec<(String, Schema)>, Error> {
    let Value::Object(entries) = read_json(path)? else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("schema file must be a JSON object mapping table name to schema")
            .with_path(path));
    };
    entries
        .into_iter()
        .map(|(name, raw)| match Schema::try_from(raw) {
            Ok(schema) => Ok((name, schema)),
            Err(err) => Err(err
                .with_hint(format!("Check the schema for table '{name}'."))
                .with_path(path)),
        })
        .collect()
}

fn read_json(path: &Path) -> Result<Value, Error> {
    let text =
        fs::read_to_string(path).map_err(|err| io_error(err, "failed to read JSON file", path))?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid JSON: {err}"))
            .with_path(path)
    })
}

fn records_from(value: Value, path: &Path, table: &str) -> Result<Vec<Record>, Error> {
    let Value::Array(items) = value else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("seed data for table '{table}' must be an array of records"))
            .with_path(path));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            record_from_json(item).map_err(|err| {
                err.with_hint(format!("Record {index} of table '{table}' is not an object."))
                    .with_path(path)
            })
        })
        .collect()
}

fn io_error(err: std::io::Error, message: &str, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}
