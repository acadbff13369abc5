//! HTML cluster report.
//!
//! One block per final cluster with its id, member count, keywords and the
//! full ordered list of member titles, for manually checking that a label
//! matches its members.

use std::fmt::Write as _;

use crate::label::{group_members, LabelTable};
use crate::models::{FinalAssignment, Record, UNASSIGNED, UNCATEGORIZED_NAME};

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const STYLE: &str = "body{font-family:sans-serif;margin:2em;max-width:60em}\
.cluster{border:1px solid #ccc;border-radius:6px;padding:1em;margin-bottom:1.5em}\
.keywords{color:#2a5d9f}ol{margin:0.5em 0 0 1.5em}";

/// Render the report page.
///
/// Clusters appear in ascending id order. Records without a final cluster
/// are listed last, under the uncategorized heading, if there are any.
pub fn render_html_report(labels: &LabelTable, records: &[Record], assignments: &[FinalAssignment]) -> String {
    let groups = group_members(records, assignments, labels.iter().map(|(id, _)| id));
    let assigned: std::collections::HashSet<&str> = assignments
        .iter()
        .filter(|a| a.final_cluster != UNASSIGNED)
        .map(|a| a.link.as_str())
        .collect();

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Cluster report</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>Cluster report</h1>\n<p>{} clusters, {} articles</p>\n",
        groups.len(),
        records.len()
    );

    for group in &groups {
        let keywords = labels
            .get(group.id)
            .map(|l| l.keywords.join(", "))
            .unwrap_or_default();
        let titles: Vec<&str> = group.records.iter().map(|&i| records[i].title.as_str()).collect();
        write_section(&mut html, &group.id.to_string(), &keywords, &titles);
    }

    let uncategorized: Vec<&str> = records
        .iter()
        .filter(|r| !assigned.contains(r.link.as_str()))
        .map(|r| r.title.as_str())
        .collect();
    if !uncategorized.is_empty() {
        write_section(&mut html, UNCATEGORIZED_NAME, "", &uncategorized);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn write_section(html: &mut String, heading: &str, keywords: &str, titles: &[&str]) {
    let _ = write!(
        html,
        "<div class=\"cluster\">\n<h2>Cluster {} ({} articles)</h2>\n",
        escape_html(heading),
        titles.len()
    );
    if !keywords.is_empty() {
        let _ = writeln!(html, "<p class=\"keywords\"><strong>Keywords:</strong> {}</p>", escape_html(keywords));
    }
    html.push_str("<ol>\n");
    for title in titles {
        let _ = writeln!(html, "<li>{}</li>", escape_html(title));
    }
    html.push_str("</ol>\n</div>\n");
}
