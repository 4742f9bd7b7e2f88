//! Report helpers - スキャン結果の解釈と欠陥説明 HTML の生成
//!
//! All functions here are pure; the processor feeds them decoded CLI output.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Routing keys embedded in the application-version description as
/// `KEY: value` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvDescription {
    pub release_id: Option<String>,
    pub domain: Option<String>,
    pub project: Option<String>,
    pub subproject: Option<String>,
}

impl AvDescription {
    pub fn parse(description: &str) -> Self {
        let mut parsed = Self::default();
        for line in description.lines() {
            let Some((key, value)) = key_value(line) else {
                continue;
            };
            let slot = match key {
                "RELEASE_ID" => &mut parsed.release_id,
                "DOMAIN" => &mut parsed.domain,
                "PROJECT" => &mut parsed.project,
                "SUBPROJECT" => &mut parsed.subproject,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        parsed
    }
}

/// `KEY: value` where KEY is `[A-Z_]+` and value is non-empty.
fn key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    let key_len = line
        .bytes()
        .take_while(|b| b.is_ascii_uppercase() || *b == b'_')
        .count();
    if key_len == 0 {
        return None;
    }
    let (key, rest) = line.split_at(key_len);
    let value = rest.trim_start().strip_prefix(':')?.trim();
    (!value.is_empty()).then_some((key, value))
}

/// One entry of the scan CLI's artifact listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub scan_types: Value,
}

impl Artifact {
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.upload_date.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Scan types as one comma-separated string.
    pub fn scan_types_text(&self) -> String {
        match &self.scan_types {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(value_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn includes_sca(&self) -> bool {
        self.scan_types_text().to_ascii_uppercase().contains("SCA")
    }
}

/// Most recently uploaded artifact. Entries without a readable date lose.
pub fn latest_artifact(listing: &Value) -> Option<Artifact> {
    let items = listing.as_array()?;
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<Artifact>(item.clone()).ok())
        .max_by_key(|artifact| artifact.uploaded_at())
}

/// One severity bucket of the scan CLI's issue count output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCount {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub clean_name: Option<String>,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub audited_count: u64,
    #[serde(default)]
    pub visible_count: u64,
}

impl IssueCount {
    fn bucket_name(&self) -> String {
        match &self.clean_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => value_text(&self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityRow {
    pub severity: &'static str,
    pub total: u64,
    pub audited: u64,
    pub visible: u64,
}

/// Fixed Critical/High/Medium/Low rows plus a totals row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSummary {
    pub rows: [SeverityRow; 4],
    pub totals: SeverityRow,
}

pub const SEVERITIES: [&str; 4] = ["Critical", "High", "Medium", "Low"];

impl IssueSummary {
    pub fn from_counts(counts: &[IssueCount]) -> Self {
        let rows = SEVERITIES.map(|severity| {
            let item = counts.iter().find(|c| c.bucket_name() == severity);
            SeverityRow {
                severity,
                total: item.map_or(0, |c| c.total_count),
                audited: item.map_or(0, |c| c.audited_count),
                visible: item.map_or(0, |c| c.visible_count),
            }
        });

        let totals = rows.iter().fold(
            SeverityRow {
                severity: "Total",
                ..SeverityRow::default()
            },
            |acc, row| SeverityRow {
                total: acc.total + row.total,
                audited: acc.audited + row.audited,
                visible: acc.visible + row.visible,
                ..acc
            },
        );

        Self { rows, totals }
    }

    fn total_for(&self, severity: &str) -> u64 {
        self.rows
            .iter()
            .find(|r| r.severity == severity)
            .map_or(0, |r| r.total)
    }

    /// Ticketing severity for the worst non-empty bucket.
    pub fn defect_severity(&self) -> &'static str {
        if self.total_for("Critical") > 0 || self.total_for("High") > 0 {
            "3-High"
        } else if self.total_for("Medium") > 0 {
            "2-Medium"
        } else {
            "1-Low"
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `<ssc>/html/ssc/version/<id>/overview`, or `None` without a usable base.
pub fn report_url(ssc_url: &str, project_version_id: &str) -> Option<String> {
    let base = ssc_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    let mut url = reqwest::Url::parse(base).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["html", "ssc", "version", project_version_id, "overview"]);
    Some(url.to_string())
}

/// Inputs of the defect description.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub ssc_url: &'a str,
    pub project_version_id: &'a str,
    pub triggered_at: &'a str,
    pub filename: &'a str,
    pub username: &'a str,
    pub issues: &'a IssueSummary,
}

pub fn render_description(ctx: &ReportContext<'_>) -> String {
    let mut html = String::new();

    html.push_str("<b>Fortify scan summary</b><br>\n---------------------<br>\n");
    let _ = writeln!(html, "<b>ProjectVersionId:</b> {}<br>", escape_html(ctx.project_version_id));
    let _ = writeln!(html, "<b>TriggeredAt:</b> {}<br>", escape_html(ctx.triggered_at));
    let _ = writeln!(html, "<b>File:</b> {}<br>", escape_html(ctx.filename));
    let _ = writeln!(html, "<b>User:</b> {}<br>", escape_html(ctx.username));
    if let Some(url) = report_url(ctx.ssc_url, ctx.project_version_id) {
        let _ = writeln!(html, "Report: <a href=\"{}\">View report</a><br>", escape_html(&url));
    }

    html.push_str("<br>\n<b>Vulnerabilities:</b><br>\n");
    html.push_str(
        "<table border=\"1\" cellpadding=\"6\" cellspacing=\"0\" style=\"border-collapse:collapse\">\n",
    );
    html.push_str(
        "  <thead>\n    <tr>\n      <th align=\"left\">Severity</th>\n      <th align=\"right\">Total</th>\n      <th align=\"right\">Visible</th>\n      <th align=\"right\">Audited</th>\n    </tr>\n  </thead>\n  <tbody>\n",
    );
    for row in &ctx.issues.rows {
        let _ = writeln!(
            html,
            "    <tr><td>{}</td><td align=\"right\">{}</td><td align=\"right\">{}</td><td align=\"right\">{}</td></tr>",
            escape_html(row.severity),
            row.total,
            row.visible,
            row.audited
        );
    }
    let totals = &ctx.issues.totals;
    let _ = writeln!(
        html,
        "    <tr><td><b>Total</b></td><td align=\"right\"><b>{}</b></td><td align=\"right\"><b>{}</b></td><td align=\"right\"><b>{}</b></td></tr>",
        totals.total, totals.visible, totals.audited
    );
    html.push_str("  </tbody>\n</table>");

    html
}

/// Display text of a JSON scalar; `null` and missing render empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn description_keys_are_extracted() {
        let parsed = AvDescription::parse(
            "Owner notes\r\n  RELEASE_ID : 1042 \nDOMAIN: BANKING\nPROJECT:Payments\nlowercase: ignored\nSUBPROJECT:\n",
        );

        assert_eq!(parsed.release_id.as_deref(), Some("1042"));
        assert_eq!(parsed.domain.as_deref(), Some("BANKING"));
        assert_eq!(parsed.project.as_deref(), Some("Payments"));
        assert_eq!(parsed.subproject, None);
    }

    #[test]
    fn latest_artifact_uses_upload_date() {
        let listing = json!([
            {"id": 1, "uploadDate": "2024-01-01T10:00:00.000+0000", "scanTypes": "SCA"},
            {"id": 2, "uploadDate": "2024-03-01T10:00:00.000+0000", "scanTypes": "SAST"},
            {"id": 3, "uploadDate": "2024-02-01T10:00:00Z", "scanTypes": "SCA"},
            {"id": 4, "uploadDate": "garbage"}
        ]);

        let latest = latest_artifact(&listing).unwrap();
        assert_eq!(latest.id, json!(2));
        assert!(!latest.includes_sca());
    }

    #[rstest]
    #[case(json!([]))]
    #[case(json!({"error": "not a list"}))]
    fn no_artifacts(#[case] listing: Value) {
        assert!(latest_artifact(&listing).is_none());
    }

    #[rstest]
    #[case(json!("SCA"), true)]
    #[case(json!("sast,sca"), true)]
    #[case(json!(["SAST", "SCA"]), true)]
    #[case(json!("SAST"), false)]
    #[case(Value::Null, false)]
    fn sca_detection(#[case] scan_types: Value, #[case] expected: bool) {
        let artifact = Artifact {
            scan_types,
            ..Artifact::default()
        };
        assert_eq!(artifact.includes_sca(), expected);
    }

    #[test]
    fn counts_are_normalised_to_fixed_rows() {
        let counts: Vec<IssueCount> = serde_json::from_value(json!([
            {"id": "High", "cleanName": "High", "totalCount": 3, "auditedCount": 1, "visibleCount": 2},
            {"id": "Low", "totalCount": 5, "auditedCount": 0, "visibleCount": 5},
            {"cleanName": "Info", "totalCount": 9}
        ]))
        .unwrap();

        let summary = IssueSummary::from_counts(&counts);
        assert_eq!(summary.rows.map(|r| r.total), [0, 3, 0, 5]);
        assert_eq!(summary.totals.total, 8);
        assert_eq!(summary.totals.audited, 1);
        assert_eq!(summary.totals.visible, 7);
    }

    #[rstest]
    #[case([1, 0, 0, 0], "3-High")]
    #[case([0, 2, 0, 0], "3-High")]
    #[case([0, 0, 4, 9], "2-Medium")]
    #[case([0, 0, 0, 9], "1-Low")]
    #[case([0, 0, 0, 0], "1-Low")]
    fn severity_follows_worst_bucket(#[case] totals: [u64; 4], #[case] expected: &str) {
        let counts: Vec<IssueCount> = SEVERITIES
            .iter()
            .zip(totals)
            .map(|(name, total)| IssueCount {
                clean_name: Some(name.to_string()),
                total_count: total,
                ..IssueCount::default()
            })
            .collect();

        assert_eq!(IssueSummary::from_counts(&counts).defect_severity(), expected);
    }

    #[test]
    fn report_url_joins_and_encodes() {
        assert_eq!(
            report_url("https://ssc.example.com/ssc/", "10 2").as_deref(),
            Some("https://ssc.example.com/ssc/html/ssc/version/10%202/overview")
        );
        assert_eq!(report_url("", "10"), None);
        assert_eq!(report_url("not a url", "10"), None);
    }

    #[test]
    fn description_escapes_untrusted_fields() {
        let issues = IssueSummary::from_counts(&[]);
        let html = render_description(&ReportContext {
            ssc_url: "",
            project_version_id: "10",
            triggered_at: "2024-01-01",
            filename: "<script>alert(\"x\")</script>&.fpr",
            username: "dev",
            issues: &issues,
        });

        assert!(html.contains("&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;&amp;.fpr"));
        assert!(!html.contains("<script>"));
        assert!(!html.contains("View report"));
        assert!(html.contains("<td><b>Total</b></td>"));
    }
}
