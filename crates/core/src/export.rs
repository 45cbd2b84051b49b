//! Writers for resolved user records.
//!
//! CSV output uses the column layout expected by the downstream provisioning
//! tool; JSON output is the full record list.

use std::io::Write;

use serde::Serialize;
use tracing::debug;

use crate::errors::ExportError;
use crate::models::UserRecord;

/// Column order of the CSV export.
pub const CSV_HEADER: [&str; 8] = [
    "firstname",
    "lastname",
    "email",
    "country",
    "groups",
    "identity_type",
    "username",
    "domain",
];

/// One CSV row. Field order must match [`CSV_HEADER`].
#[derive(Debug, Serialize)]
struct CsvUserRow<'a> {
    firstname: Option<&'a str>,
    lastname: Option<&'a str>,
    email: &'a str,
    country: Option<&'a str>,
    groups: String,
    identity_type: &'static str,
    username: &'a str,
    domain: Option<&'a str>,
}

impl<'a> From<&'a UserRecord> for CsvUserRow<'a> {
    fn from(record: &'a UserRecord) -> Self {
        Self {
            firstname: record.firstname.as_deref(),
            lastname: record.lastname.as_deref(),
            email: &record.email,
            country: record.country.as_deref(),
            groups: record.groups.join(","),
            identity_type: record.identity_type.as_str(),
            username: &record.username,
            domain: record.domain.as_deref(),
        }
    }
}

/// Write `records` as CSV, sorted by email. The header is always written.
pub fn write_csv<W: Write>(writer: W, records: &[UserRecord]) -> Result<(), ExportError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(CSV_HEADER)?;

    let mut sorted: Vec<&UserRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.email.cmp(&b.email));
    for record in sorted {
        wtr.serialize(CsvUserRow::from(record))?;
    }
    wtr.flush()?;
    debug!(rows = records.len(), "CSV export written");
    Ok(())
}

/// Write `records` as a pretty-printed JSON array.
pub fn write_json<W: Write>(mut writer: W, records: &[UserRecord]) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    debug!(records = records.len(), "JSON export written");
    Ok(())
}
