//! Records command implementation.

use super::{CliResult, DataDir};
use crate::Format;
use serde_json::Value;
use std::path::Path;
use stocksync_core::Record;

/// Parses a lookup value. Anything that is not valid JSON is a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Collects the records of a domain, optionally filtered by an index.
pub fn collect(path: &Path, domain: &str, filter: Option<(String, String)>) -> CliResult<Vec<Record>> {
    let data = DataDir::open(path)?;
    data.open_domain(domain)?;
    let records = match filter {
        Some((index, raw)) => data
            .store
            .query_by_index(domain, &index, &parse_value(&raw))?,
        None => data.store.get_all(domain)?,
    };
    Ok(records)
}

/// Runs the records command.
pub fn run(
    path: &Path,
    domain: &str,
    filter: Option<(String, String)>,
    format: Format,
) -> CliResult<()> {
    let records = collect(path, domain, filter)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
            println!("({} record(s))", records.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seeded_dir;
    use crate::commands::CliError;
    use stocksync_core::CoreError;

    #[test]
    fn dumps_all_records() {
        let dir = seeded_dir();
        let records = collect(dir.path(), "products", None).unwrap();
        let codes: Vec<_> = records.iter().filter_map(|r| r.key_for("code")).collect();
        assert_eq!(codes, vec!["P1", "P2"]);
    }

    #[test]
    fn filters_by_index() {
        let dir = seeded_dir();
        let filter = Some(("category".to_string(), "paint".to_string()));
        let records = collect(dir.path(), "products", filter).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key_for("code").as_deref(), Some("P2"));

        let quoted = Some(("category".to_string(), "\"tools\"".to_string()));
        assert_eq!(collect(dir.path(), "products", quoted).unwrap().len(), 1);
    }

    #[test]
    fn unknown_index_is_an_error() {
        let dir = seeded_dir();
        let filter = Some(("colour".to_string(), "red".to_string()));
        assert!(matches!(
            collect(dir.path(), "products", filter),
            Err(CliError::Core(CoreError::UnknownIndex { .. }))
        ));
    }

    #[test]
    fn lookup_values_fall_back_to_strings() {
        assert_eq!(parse_value("42"), Value::from(42));
        assert_eq!(parse_value("tools"), Value::from("tools"));
        assert_eq!(parse_value("\"tools\""), Value::from("tools"));
    }
}
