//! `ezk traces` and `ezk logs`: toggle instrumentation on one workload

use anyhow::{bail, Result};
use tabled::Tabled;

use crate::client::{AnnotateResult, ApiClient, LogsItem, TracesItem};
use crate::output::{print_json, print_success, OutputFormat};

/// Row for the annotation result table
#[derive(Tabled)]
struct AnnotationRow {
    #[tabled(rename = "Annotation")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Split `namespace/name`
pub fn parse_target(target: &str) -> Result<(String, String)> {
    match target.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => bail!("Expected <namespace>/<name>, got '{}'", target),
    }
}

fn print_results(results: &[AnnotateResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(results)?,
        OutputFormat::Table => {
            for result in results {
                print_success(&format!(
                    "{} {}/{} updated",
                    result.controller_kind, result.namespace, result.name
                ));
                if result.updated_annotations.is_empty() {
                    continue;
                }
                let rows: Vec<AnnotationRow> = result
                    .updated_annotations
                    .iter()
                    .map(|(key, value)| AnnotationRow {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                let table = tabled::Table::new(rows)
                    .with(tabled::settings::Style::rounded())
                    .to_string();
                println!("{}", table);
            }
        }
    }
    Ok(())
}

/// Enable (`add`) or disable (`delete`) traces instrumentation
pub async fn set_traces(
    client: &ApiClient,
    kind: &str,
    target: &str,
    enable: bool,
    service_name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let (namespace, name) = parse_target(target)?;
    let item = TracesItem {
        name,
        controller_kind: kind.to_string(),
        namespace,
        action: if enable { "add" } else { "delete" }.to_string(),
        service_name,
    };

    let results = client.annotate_traces(&[item]).await?;
    print_results(&results, format)
}

/// Set the log type, or clear it when `log_type` is empty
pub async fn set_log_type(
    client: &ApiClient,
    kind: &str,
    target: &str,
    log_type: &str,
    format: OutputFormat,
) -> Result<()> {
    let (namespace, name) = parse_target(target)?;
    let item = LogsItem {
        name,
        controller_kind: kind.to_string(),
        namespace,
        log_type: log_type.to_string(),
    };

    let results = client.annotate_logs(&[item]).await?;
    print_results(&results, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("shop/cart").unwrap(),
            ("shop".to_string(), "cart".to_string())
        );
        assert!(parse_target("cart").is_err());
        assert!(parse_target("/cart").is_err());
        assert!(parse_target("shop/").is_err());
        assert!(parse_target("a/b/c").is_err());
    }
}
