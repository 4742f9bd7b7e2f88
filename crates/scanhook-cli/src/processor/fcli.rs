//! FcliClient - スキャン CLI (fcli) の実行
//!
//! 各コマンドは JOB_TIMEOUT で打ち切り、タイムアウト時はプロセスを kill する。
//! SSC コマンドの前には毎回セッションを確認し、無ければログインする。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use scanhook_core::domain::ProcessError;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::ScanSource;
use crate::config::FcliConfig;

#[derive(Debug, Error)]
pub enum FcliError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}ms", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` failed: {message}")]
    Failed {
        command: String,
        code: Option<i32>,
        message: String,
    },
}

impl FcliError {
    /// Does this failure mean "no SSC session yet"?
    pub fn is_missing_session(&self) -> bool {
        let FcliError::Failed { message, .. } = self else {
            return false;
        };
        let text = message.to_lowercase();
        text.contains("no session")
            || text.contains("not logged in")
            || (text.contains("session") && text.contains("login"))
    }
}

impl From<FcliError> for ProcessError {
    fn from(err: FcliError) -> Self {
        match err {
            FcliError::Timeout { command, timeout } => ProcessError::Timeout {
                operation: command,
                after: timeout,
            },
            other => ProcessError::external(other),
        }
    }
}

pub struct FcliClient {
    config: FcliConfig,
    timeout: Duration,
}

impl FcliClient {
    pub fn new(config: FcliConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Run the CLI once. `label` is what appears in logs and errors, so
    /// credentials never leak through it.
    async fn run(&self, label: &str, args: &[String]) -> Result<String, FcliError> {
        let command = format!("{} {label}", self.config.bin);
        debug!(%command, "running fcli");

        let child = Command::new(&self.config.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FcliError::Spawn {
                command: command.clone(),
                source,
            })?;

        // timeout で future を捨てると child も drop され kill される
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                return Err(FcliError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
            Ok(result) => result.map_err(|source| FcliError::Spawn {
                command: command.clone(),
                source,
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code();
            let message = if stderr.is_empty() {
                format!("exit code {code:?}")
            } else {
                stderr
            };
            return Err(FcliError::Failed {
                command,
                code,
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Probe the session with a cheap query; log in only when the probe
    /// says there is no session. Any other probe failure propagates.
    pub async fn ensure_session(&self) -> Result<(), FcliError> {
        let session = self.config.session.as_str();
        let probe = args([
            "ssc",
            "appversion",
            "list",
            "-q",
            "id==-1",
            "--output=json",
            "--ssc-session",
            session,
        ]);

        match self.run("ssc appversion list (session probe)", &probe).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_missing_session() => {}
            Err(err) => return Err(err),
        }

        let mut login = args([
            "ssc",
            "session",
            "login",
            "--url",
            self.config.ssc_url.as_str(),
            "-u",
            self.config.user.as_str(),
            "-p",
            self.config.pass.expose(),
            "--ssc-session",
            session,
            "--output=json",
        ]);
        if self.config.insecure {
            login.push("--insecure".to_string());
        }

        self.run("ssc session login", &login).await?;
        info!(session = %session, "fcli session login ok");
        Ok(())
    }

    async fn run_ssc(&self, ssc_args: &[&str]) -> Result<String, FcliError> {
        self.ensure_session().await?;

        let mut full = vec!["ssc".to_string()];
        full.extend(ssc_args.iter().map(|a| a.to_string()));
        full.push("--ssc-session".to_string());
        full.push(self.config.session.clone());

        let label = format!("ssc {}", ssc_args.join(" "));
        self.run(&label, &full).await
    }
}

fn args<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

#[async_trait]
impl ScanSource for FcliClient {
    async fn app_version(&self, av_id: &str) -> Result<String, ProcessError> {
        Ok(self.run_ssc(&["av", "get", av_id, "--output=json"]).await?)
    }

    async fn artifacts(&self, av_id: &str) -> Result<String, ProcessError> {
        let av = format!("--av={av_id}");
        Ok(self.run_ssc(&["artifact", "ls", &av, "--output=json"]).await?)
    }

    async fn issue_counts(&self, av_id: &str) -> Result<String, ProcessError> {
        let av = format!("--av={av_id}");
        Ok(self.run_ssc(&["issue", "count", &av, "--output=json"]).await?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Secret;
    use rstest::rstest;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Write an executable shell script standing in for the CLI.
    fn fake_cli(dir: &Path, body: &str) -> String {
        let path = dir.join("fcli");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn client(bin: String, timeout: Duration) -> FcliClient {
        FcliClient::new(
            FcliConfig {
                bin,
                ssc_url: "http://ssc.local/ssc".to_string(),
                user: "admin".to_string(),
                pass: Secret::new("s3cret"),
                session: "test".to_string(),
                insecure: true,
            },
            timeout,
        )
    }

    #[tokio::test]
    async fn logs_in_when_probe_reports_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("logged-in");
        let log = dir.path().join("calls.log");
        let script = format!(
            r#"
echo "$@" >> "{log}"
case "$2" in
  appversion)
    if [ -f "{marker}" ]; then echo '[]'; else echo "No session found, please login" >&2; exit 1; fi ;;
  session)
    touch "{marker}"; echo '{{}}' ;;
  av)
    echo '{{"id": 10, "name": "app-1.0"}}' ;;
esac
"#,
            log = log.display(),
            marker = marker.display()
        );
        let fcli = client(fake_cli(dir.path(), &script), Duration::from_secs(10));

        let out = fcli.app_version("10").await.unwrap();
        assert_eq!(out, r#"{"id": 10, "name": "app-1.0"}"#);

        // already logged in: probe only
        fcli.app_version("10").await.unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let logins: Vec<_> = calls.lines().filter(|l| l.starts_with("ssc session login")).collect();
        assert_eq!(logins.len(), 1);
        assert!(logins[0].contains("--insecure"));
        assert!(calls.contains("ssc av get 10 --output=json --ssc-session test"));
    }

    #[tokio::test]
    async fn other_probe_failures_do_not_trigger_login() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"
if [ "$2" = "session" ]; then echo "login must not run" >&2; exit 3; fi
echo "SSL handshake failed" >&2
exit 2
"#;
        let fcli = client(fake_cli(dir.path(), script), Duration::from_secs(10));

        let err = fcli.ensure_session().await.unwrap_err();
        match err {
            FcliError::Failed { code, message, .. } => {
                assert_eq!(code, Some(2));
                assert_eq!(message, "SSL handshake failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn hung_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let fcli = client(fake_cli(dir.path(), "sleep 30"), Duration::from_millis(200));

        let err = fcli.ensure_session().await.unwrap_err();
        assert!(matches!(err, FcliError::Timeout { .. }));

        let process: ProcessError = err.into();
        assert!(matches!(process, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let fcli = client("/nonexistent/fcli".to_string(), Duration::from_secs(1));
        let err = fcli.ensure_session().await.unwrap_err();
        assert!(matches!(err, FcliError::Spawn { .. }));
        assert!(!err.to_string().contains("s3cret"));
    }

    #[rstest]
    #[case("No session available", true)]
    #[case("User is not logged in", true)]
    #[case("Session expired, run session login", true)]
    #[case("Connection refused", false)]
    fn missing_session_detection(#[case] message: &str, #[case] expected: bool) {
        let err = FcliError::Failed {
            command: "fcli ssc appversion list".to_string(),
            code: Some(1),
            message: message.to_string(),
        };
        assert_eq!(err.is_missing_session(), expected);
    }
}
