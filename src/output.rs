use std::path::Path;

use chrono::Local;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::catalog::{CatalogRecord, CHARACTERISTICS};
use crate::{info_time, Result};

/// Renders the catalog as a flat delimited table: a header row naming every
/// column, then one row per record.
pub fn render_csv(records: &[CatalogRecord]) -> String {
    let mut out = String::with_capacity(records.len() * 48 + 64);
    out.push_str("id,price");
    for name in CHARACTERISTICS {
        out.push(',');
        out.push_str(name);
    }
    out.push('\n');

    for record in records {
        out.push_str(&csv_field(&record.id));
        out.push(',');
        out.push_str(&format!("{:.2}", record.price));
        for value in &record.characteristics {
            out.push(',');
            out.push_str(&csv_field(value));
        }
        out.push('\n');
    }
    out
}

/// Quotes a field only when it would break the row.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes the rendered table to `path`, or to stdout when no path was given.
pub async fn write_catalog(records: &[CatalogRecord], path: Option<&Path>) -> Result<()> {
    let start_time = Local::now();
    let rendered = render_csv(records);
    match path {
        Some(path) => {
            let mut file = File::create(path).await?;
            file.write_all(rendered.as_bytes()).await?;
            info_time!(
                start_time,
                "Wrote {} records to {}",
                records.len(),
                path.display()
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(rendered.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, price: f64, vals: [&str; 4]) -> CatalogRecord {
        CatalogRecord {
            id: id.into(),
            price,
            characteristics: vals.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn header_names_every_column() {
        assert_eq!(render_csv(&[]), "id,price,carat,cut,color,clarity\n");
    }

    #[test]
    fn rows_follow_the_header_order() {
        let rendered = render_csv(&[record("d-1", 512.5, ["0.31", "Ideal", "G", "VS2"])]);
        assert_eq!(rendered.lines().nth(1), Some("d-1,512.50,0.31,Ideal,G,VS2"));
    }

    #[test]
    fn awkward_fields_get_quoted() {
        let rendered = render_csv(&[record("d-2", 100.0, ["1.0", "Very, Good", "", "IF"])]);
        assert!(rendered.contains("\"Very, Good\""));
    }

    #[test]
    fn missing_characteristics_stay_as_empty_cells() {
        let rendered = render_csv(&[record("d-3", 99.99, ["", "", "", ""])]);
        assert_eq!(rendered.lines().nth(1), Some("d-3,99.99,,,,"));
    }
}
