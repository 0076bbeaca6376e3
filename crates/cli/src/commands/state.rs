//! `ezk state`: show the instrumentation state of the cluster

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, StateRecord};
use crate::output::{color_status, format_bool, or_dash, print_json, print_warning, OutputFormat};

/// Row for the state table
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Detected")]
    detected: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Traces")]
    traces: String,
    #[tabled(rename = "Log Type")]
    log_type: String,
    #[tabled(rename = "Detection")]
    detection: String,
}

impl From<&StateRecord> for StateRow {
    fn from(r: &StateRecord) -> Self {
        let detected = r
            .language
            .as_deref()
            .or(r.application.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| "-".to_string());
        let traces = if r.traces_instrumentable {
            format_bool(r.traces_instrumented)
        } else {
            "n/a".to_string()
        };
        Self {
            namespace: r.namespace.clone(),
            name: r.name.clone(),
            kind: r.controller_kind.clone(),
            container: or_dash(r.container_name.as_deref()),
            detected,
            service: or_dash(r.service_name.as_deref()),
            traces,
            log_type: or_dash(r.log_type.as_deref()),
            detection: color_status(&r.detection_status),
        }
    }
}

/// Keep records matching the optional namespace and kind filters
pub fn filter_records(
    records: Vec<StateRecord>,
    namespace: Option<&str>,
    kind: Option<&str>,
) -> Vec<StateRecord> {
    records
        .into_iter()
        .filter(|r| namespace.map(|ns| r.namespace == ns).unwrap_or(true))
        .filter(|r| {
            kind.map(|k| r.controller_kind.eq_ignore_ascii_case(k))
                .unwrap_or(true)
        })
        .collect()
}

pub async fn show_state(
    client: &ApiClient,
    namespace: Option<String>,
    kind: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let records = client.state().await?;
    let filtered = filter_records(records, namespace.as_deref(), kind.as_deref());

    match format {
        OutputFormat::Json => print_json(&filtered)?,
        OutputFormat::Table => {
            if filtered.is_empty() {
                print_warning("No instrumented applications found");
                return Ok(());
            }

            let rows: Vec<StateRow> = filtered.iter().map(StateRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} records", filtered.len());
        }
    }

    Ok(())
}
