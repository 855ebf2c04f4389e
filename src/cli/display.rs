//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{CommandError, CommandResult, PoolStatusRow, RenderedPool};
use crate::cluster::{ChildAction, Severity};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Pool display
// ============================================================================

/// Format pool rows for `workerpool get`
pub fn format_pool_status(rows: &[PoolStatusRow]) -> String {
    let headers = &[
        "NAMESPACE",
        "NAME",
        "WORKERS",
        "ALGORITHM",
        "CHILDREN",
        "REPLICAS",
        "STATUS",
    ];
    let table: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let status = if row.is_converged() {
                "Converged"
            } else if row.ready_children() == 0 {
                "Missing"
            } else {
                "Provisioning"
            };

            vec![
                row.namespace.clone(),
                row.name.clone(),
                row.workers.to_string(),
                row.algorithm.to_string(),
                format!("{}/{}", row.ready_children(), row.present.len()),
                row.replicas
                    .map(|r| format!("{}/{}", r, row.workers - 1))
                    .unwrap_or_else(|| "-".to_string()),
                status.to_string(),
            ]
        })
        .collect();

    format_table(headers, table)
}

/// Format a rendered pool as a multi-document YAML stream
pub fn format_rendered(rendered: &RenderedPool) -> CommandResult<String> {
    let mut output = String::new();

    for (outcome, object) in &rendered.children {
        let action = match &outcome.action {
            ChildAction::Created => "created",
            ChildAction::AlreadyExisted => "already existed",
            ChildAction::Updated { .. } => "updated",
            ChildAction::Unchanged => "unchanged",
        };
        output.push_str(&format!("# {} ({})\n", outcome.child, action));
        let yaml =
            serde_yaml::to_string(object).map_err(|e| CommandError::Manifest(e.to_string()))?;
        output.push_str(&yaml);
        output.push_str("---\n");
    }

    output.push_str("# Events\n");
    if rendered.events.is_empty() {
        output.push_str("#   <none>\n");
    }
    for event in &rendered.events {
        let severity = match event.severity {
            Severity::Normal => "Normal",
            Severity::Warning => "Warning",
        };
        output.push_str(&format!(
            "#   {:<8} {:<16} {}\n",
            severity, event.reason, event.note
        ));
    }

    Ok(output)
}

/// Format the supported algorithm list
pub fn format_algorithms(names: &[&str]) -> String {
    let mut output = String::new();
    for (i, name) in names.iter().enumerate() {
        let marker = if i == 0 { " (default)" } else { "" };
        output.push_str(&format!("{}{}\n", name, marker));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Algorithm, Child};

    fn row(name: &str, present: bool, replicas: Option<i32>) -> PoolStatusRow {
        PoolStatusRow {
            namespace: "default".to_string(),
            name: name.to_string(),
            workers: 3,
            algorithm: Algorithm::Kruskal,
            present: Child::ALL.iter().map(|c| (*c, present)).collect(),
            replicas,
        }
    }

    #[test]
    fn test_format_table() {
        let headers = &["NAME", "AGE"];
        let rows = vec![
            vec!["Alice".to_string(), "30".to_string()],
            vec!["Bob".to_string(), "25".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.contains("NAME"));
        assert!(output.contains("Alice"));
        assert!(output.contains("Bob"));
    }

    #[test]
    fn test_format_table_empty() {
        let headers = &["NAME"];
        let rows: Vec<Vec<String>> = vec![];

        let output = format_table(headers, rows);
        assert!(output.contains("No resources found"));
    }

    #[test]
    fn test_format_pool_status() {
        let rows = vec![row("ready", true, Some(2)), row("fresh", false, None)];
        let output = format_pool_status(&rows);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("4/4"));
        assert!(lines[1].contains("2/2"));
        assert!(lines[1].contains("Converged"));
        assert!(lines[2].contains("0/4"));
        assert!(lines[2].contains("Missing"));
    }

    #[test]
    fn test_format_pool_status_drifted() {
        let output = format_pool_status(&[row("drifted", true, Some(7))]);
        assert!(output.contains("7/2"));
        assert!(output.contains("Provisioning"));
    }

    #[tokio::test]
    async fn test_format_rendered_labels_match_objects() {
        let pool = crate::cluster::WorkerPool::new(
            "graph",
            crate::cluster::WorkerPoolSpec::new("g1", 3),
        );
        let rendered = crate::cli::render_pool(pool, "default", Default::default())
            .await
            .unwrap();
        let output = format_rendered(&rendered).unwrap();

        let docs: Vec<&str> = output.split("---\n").collect();
        assert_eq!(docs.len(), 5);
        let expected = [
            ("# launcher-service (created)", "name: g1-launcher-service"),
            ("# worker-service (created)", "name: g1-worker-service"),
            ("# worker-statefulset (created)", "kind: StatefulSet"),
            ("# launcher-job (created)", "name: g1-launcher-job"),
        ];
        for (doc, (header, field)) in docs.iter().zip(expected) {
            assert!(doc.starts_with(header), "{doc}");
            assert!(doc.contains(field), "{doc}");
        }
        assert!(docs[4].starts_with("# Events\n"));
    }

    #[test]
    fn test_format_algorithms() {
        let output = format_algorithms(&["Kruskal", "Prim"]);
        assert_eq!(output, "Kruskal (default)\nPrim\n");
    }
}
