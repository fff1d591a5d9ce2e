// 📥 Bulk Import - flag states from CSV, each row validated like form input

use crate::conditions::ConditionRegistry;
use crate::db::{in_transaction, insert_flag_state, InsertOutcome};
use crate::forms::{FieldErrors, FlagStateForm, FormData};
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

/// A row that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    /// 1-based line in the file (the header is line 1)
    pub line: usize,
    pub errors: FieldErrors,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedRow>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.inserted + self.duplicates + self.rejected.len()
    }
}

/// Import `name,condition,value[,required]` rows.
///
/// Invalid rows are reported, not fatal. A malformed file is, and then
/// nothing from the file is kept.
pub fn import_flag_states_csv(
    csv_path: &Path,
    registry: &ConditionRegistry,
    conn: &Connection,
) -> Result<ImportReport> {
    let reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;

    import_flag_states(reader, registry, conn)
}

pub fn import_flag_states<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    registry: &ConditionRegistry,
    conn: &Connection,
) -> Result<ImportReport> {
    let report = in_transaction(conn, |conn| {
        let mut report = ImportReport::default();

        for (index, row) in reader.deserialize::<FormData>().enumerate() {
            let line = index + 2;
            let data = row.with_context(|| format!("Failed to read CSV row at line {}", line))?;

            let form = FlagStateForm::new(&data, registry);
            let state = match form.to_record() {
                Ok(state) => state,
                Err(_) => {
                    tracing::debug!(line, errors = %form.errors(), "rejected flag state row");
                    report.rejected.push(RejectedRow {
                        line,
                        errors: form.errors().clone(),
                    });
                    continue;
                }
            };

            match insert_flag_state(conn, &state, "csv_importer")? {
                InsertOutcome::Inserted => report.inserted += 1,
                InsertOutcome::Duplicate => report.duplicates += 1,
            }
        }

        Ok(report)
    })?;

    tracing::info!(
        inserted = report.inserted,
        duplicates = report.duplicates,
        rejected = report.rejected.len(),
        "imported flag states"
    );

    Ok(report)
}
