//! Scan-report processor - スキャン完了通知 → 欠陥起票
//!
//! 外部との境界は 2 つの trait:
//! - **ScanSource**: アプリバージョン・artifact・issue 件数の取得（fcli）
//! - **DefectSink**: 欠陥の起票（ALM REST）
//!
//! 業務ルールで処理しないと決まったものは `Outcome` で返す（skipped / failed、
//! retry されない）。外部呼び出しの失敗と出力の decode 失敗は `ProcessError`
//! として上げ、worker の retry に任せる。

pub mod alm;
pub mod cookie_jar;
pub mod fcli;
pub mod report;

use std::sync::Arc;

use async_trait::async_trait;
use scanhook_core::domain::{Outcome, ProcessError};
use scanhook_core::ports::{Clock, JobProcessor, SystemClock};
use scanhook_core::queue::Job;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use self::report::{AvDescription, IssueCount, IssueSummary, ReportContext, latest_artifact, value_text};
use crate::config::DefectConfig;

/// Raw JSON output of the scan CLI.
#[async_trait]
pub trait ScanSource: Send + Sync {
    async fn app_version(&self, av_id: &str) -> Result<String, ProcessError>;
    async fn artifacts(&self, av_id: &str) -> Result<String, ProcessError>;
    async fn issue_counts(&self, av_id: &str) -> Result<String, ProcessError>;
}

/// Ticketing domain/project a defect is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefectTarget {
    pub domain: String,
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldValue {
    pub value: String,
    #[serde(rename = "reference-value", skip_serializing_if = "Option::is_none")]
    pub reference_value: Option<String>,
}

/// One entry of the defect's `Fields` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefectField {
    #[serde(rename = "Name")]
    pub name: String,
    pub values: Vec<FieldValue>,
}

impl DefectField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![FieldValue {
                value: value.into(),
                reference_value: None,
            }],
        }
    }

    pub fn reference(
        name: impl Into<String>,
        value: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            values: vec![FieldValue {
                value: value.into(),
                reference_value: Some(reference.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedDefect {
    pub url: String,
    pub response: Value,
}

#[async_trait]
pub trait DefectSink: Send + Sync {
    async fn create_defect(
        &self,
        target: &DefectTarget,
        fields: &[DefectField],
    ) -> Result<CreatedDefect, ProcessError>;
}

#[derive(Debug, Default, Deserialize)]
struct AppVersion {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Turns a scan-completed notification into a ticketing defect.
pub struct ScanReportProcessor {
    source: Arc<dyn ScanSource>,
    sink: Arc<dyn DefectSink>,
    defect: DefectConfig,
    clock: Arc<dyn Clock>,
}

impl ScanReportProcessor {
    pub fn new(source: Arc<dyn ScanSource>, sink: Arc<dyn DefectSink>, defect: DefectConfig) -> Self {
        Self {
            source,
            sink,
            defect,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// `projectVersionId` of the first event, as text.
fn project_version_id(event: &Value) -> Option<String> {
    match event.get("projectVersionId")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode<T: serde::de::DeserializeOwned>(what: &'static str, raw: &str) -> Result<T, ProcessError> {
    serde_json::from_str(raw).map_err(|e| ProcessError::decode(what, e))
}

#[async_trait]
impl JobProcessor for ScanReportProcessor {
    async fn process(&self, job: &Job) -> Result<Outcome, ProcessError> {
        let body = job.payload.get("body").unwrap_or(&Value::Null);
        let event = body.pointer("/events/0").unwrap_or(&Value::Null);

        let Some(av_id) = project_version_id(event) else {
            return Ok(Outcome::failed("missing projectVersionId in payload"));
        };

        // 1) app version + routing keys
        let app_version: AppVersion =
            decode("app version", &self.source.app_version(&av_id).await?)?;
        let app_version_name = app_version.name.unwrap_or_default();
        let description = app_version.description.unwrap_or_default();
        let routing = AvDescription::parse(&description);

        let (Some(domain), Some(project)) = (routing.domain.clone(), routing.project.clone()) else {
            return Ok(Outcome::failed(format!(
                "DOMAIN/PROJECT missing from application version description: {description}"
            )));
        };

        // 2) latest artifact gate
        let listing: Value = decode("artifact list", &self.source.artifacts(&av_id).await?)?;
        let Some(latest) = latest_artifact(&listing) else {
            return Ok(Outcome::skipped("no artifacts for application version"));
        };

        let scan_types = latest.scan_types_text();
        info!(
            job_id = %job.id,
            project_version_id = %av_id,
            subproject = ?routing.subproject,
            artifact_id = %latest.id,
            upload_date = ?latest.upload_date,
            scan_types = %scan_types,
            "latest artifact"
        );
        if latest.includes_sca() {
            return Ok(Outcome::skipped(format!(
                "latest artifact includes SCA scan ({scan_types})"
            )));
        }

        // 3) issue counts
        let counts: Vec<IssueCount> =
            decode("issue counts", &self.source.issue_counts(&av_id).await?)?;
        let issues = IssueSummary::from_counts(&counts);

        // 4) description
        let description_html = report::render_description(&ReportContext {
            ssc_url: &value_text(body.get("sscUrl").unwrap_or(&Value::Null)),
            project_version_id: &av_id,
            triggered_at: &value_text(body.get("triggeredAt").unwrap_or(&Value::Null)),
            filename: &value_text(event.get("filename").unwrap_or(&Value::Null)),
            username: &value_text(event.get("username").unwrap_or(&Value::Null)),
            issues: &issues,
        });

        let display_name = if app_version_name.is_empty() {
            format!("AV={av_id}")
        } else {
            app_version_name.clone()
        };

        let mut fields = vec![
            DefectField::new("detected-by", &self.defect.detected_by),
            DefectField::new("creation-time", self.clock.now().format("%Y-%m-%d").to_string()),
            DefectField::new("severity", issues.defect_severity()),
            DefectField::new("name", format!("{} ({display_name})", self.defect.name_prefix)),
            DefectField::new("description", description_html),
        ];
        if let Some(release_id) = routing.release_id.as_deref().filter(|_| !app_version_name.is_empty()) {
            fields.push(DefectField::reference(
                "detected-in-rel",
                release_id,
                &app_version_name,
            ));
        }

        // 5) file the defect
        let target = DefectTarget { domain, project };
        let created = self.sink.create_defect(&target, &fields).await?;

        Ok(Outcome::done().with_detail(json!({
            "defectsUrl": created.url,
            "result": created.response,
        })))
    }
}
