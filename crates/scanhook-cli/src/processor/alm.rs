//! AlmClient - チケット管理 REST API（欠陥の起票）
//!
//! ログインは 2 段階: alm-authenticate → site-session。
//! site-session で XSRF-TOKEN cookie が返らなければ失敗扱い。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, SET_COOKIE};
use reqwest::{Response, Url};
use scanhook_core::domain::ProcessError;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use super::cookie_jar::CookieJar;
use super::{CreatedDefect, DefectField, DefectSink, DefectTarget};
use crate::config::{AlmConfig, Secret};

const XSRF_COOKIE: &str = "XSRF-TOKEN";
const XSRF_HEADER: &str = "X-XSRF-TOKEN";

#[derive(Debug, Error)]
pub enum AlmError {
    #[error("invalid ALM base url {base:?}: {message}")]
    InvalidBase { base: String, message: String },

    #[error("ALM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ALM {step} failed: {status} -> {body}")]
    Status {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("no XSRF-TOKEN received; cookies: {cookies}")]
    MissingXsrf { cookies: String },
}

impl From<AlmError> for ProcessError {
    fn from(err: AlmError) -> Self {
        ProcessError::external(err)
    }
}

pub struct AlmClient {
    http: reqwest::Client,
    base: Url,
    user: String,
    pass: Secret,
}

impl AlmClient {
    pub fn new(config: &AlmConfig, timeout: Duration) -> Result<Self, AlmError> {
        let base = Url::parse(&config.base).map_err(|e| AlmError::InvalidBase {
            base: config.base.clone(),
            message: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(AlmError::InvalidBase {
                base: config.base.clone(),
                message: "not a hierarchical url".to_string(),
            });
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base,
            user: config.user.clone(),
            pass: config.pass.clone(),
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `<base>/qcbin/rest/domains/<domain>/projects/<project>/defects`
    pub fn defects_url(&self, target: &DefectTarget) -> Url {
        self.endpoint([
            "qcbin",
            "rest",
            "domains",
            target.domain.as_str(),
            "projects",
            target.project.as_str(),
            "defects",
        ])
    }

    /// Authenticate and open a site session.
    pub async fn login(&self) -> Result<CookieJar, AlmError> {
        let mut jar = CookieJar::new();

        let auth = self
            .http
            .post(self.endpoint(["qcbin", "authentication-point", "alm-authenticate"]))
            .header(ACCEPT, "application/json")
            .json(&json!({
                "alm-authentication": { "user": self.user, "password": self.pass.expose() }
            }))
            .send()
            .await?;
        read_success("auth", auth, &mut jar).await?;

        let session = self
            .http
            .post(self.endpoint(["qcbin", "rest", "site-session"]))
            .header(ACCEPT, "application/json")
            .header(COOKIE, jar.header_value())
            .send()
            .await?;
        read_success("site-session", session, &mut jar).await?;

        if jar.get(XSRF_COOKIE).is_none() {
            return Err(AlmError::MissingXsrf {
                cookies: jar.header_value(),
            });
        }

        debug!("ALM login ok");
        Ok(jar)
    }

    /// POST one defect with an authenticated session.
    pub async fn post_defect(
        &self,
        url: Url,
        jar: &CookieJar,
        fields: &[DefectField],
    ) -> Result<Value, AlmError> {
        let mut request = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .header(COOKIE, jar.header_value());
        if let Some(xsrf) = jar.get(XSRF_COOKIE) {
            request = request.header(XSRF_HEADER, xsrf);
        }

        let response = request.json(&json!({ "Fields": fields })).send().await?;
        let mut scratch = CookieJar::new();
        let body = read_success("defects POST", response, &mut scratch).await?;

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Absorb cookies, read the body, and fail on a non-2xx status.
async fn read_success(
    step: &'static str,
    response: Response,
    jar: &mut CookieJar,
) -> Result<String, AlmError> {
    for value in response.headers().get_all(SET_COOKIE) {
        if let Ok(value) = value.to_str() {
            jar.set_from_header(value);
        }
    }

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AlmError::Status {
            step,
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[async_trait]
impl DefectSink for AlmClient {
    async fn create_defect(
        &self,
        target: &DefectTarget,
        fields: &[DefectField],
    ) -> Result<CreatedDefect, ProcessError> {
        let jar = self.login().await?;
        let url = self.defects_url(target);
        let response = self.post_defect(url.clone(), &jar, fields).await?;

        info!(url = %url, "ALM defect created");
        Ok(CreatedDefect {
            url: url.to_string(),
            response,
        })
    }
}
