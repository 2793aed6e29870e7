//! Report Coordinator (spec §4.14, component C14).
//!
//! Report renderers (HTML/Markdown/JSON/compact-summary templaters) are
//! deliberately out of scope (spec §1): they are stateless transforms over
//! a validated [`ScanResult`] and live as external programs. This module
//! only fans a completed scan out to them and collects the artifact paths
//! they report back, using the same non-shell subprocess discipline as the
//! Pattern Gateway (spec §9 "never use shell interpolation on repository
//! paths"). A renderer that fails does not fail the scan (spec §4.14
//! "Rendering failures are surfaced as warnings").

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::warn;

use crate::types::ScanResult;

/// One renderer invocation: a format name and the external command that
/// turns a `ScanResult` (JSON on stdin) into an artifact (its path on
/// stdout). Mirrors the Pattern Gateway's "external binary, JSON I/O"
/// contract generalized from one matcher to N renderers.
#[derive(Debug, Clone)]
pub struct RendererSpec {
    pub format: String,
    pub command: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReportCoordinatorConfig {
    pub renderers: Vec<RendererSpec>,
    pub timeout: Duration,
}

impl ReportCoordinatorConfig {
    /// `REPORT_RENDERERS` is a comma-separated `format:command` list, e.g.
    /// `html:render-html,markdown:render-md,json:render-json`. Empty or
    /// unset means no renderers are configured and `dispatch` is a no-op.
    pub fn from_env() -> Self {
        let renderers = std::env::var("REPORT_RENDERERS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|entry| {
                        let (format, command) = entry.split_once(':')?;
                        Some(RendererSpec {
                            format: format.trim().to_string(),
                            command: command.trim().into(),
                            args: vec!["--json".to_string()],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            renderers,
            timeout: Duration::from_secs(
                std::env::var("REPORT_RENDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

/// Either an artifact path or a warning, one per configured renderer.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Artifact { format: String, path: String },
    Warning { format: String, message: String },
}

pub struct ReportCoordinator {
    config: ReportCoordinatorConfig,
}

impl ReportCoordinator {
    pub fn new(config: ReportCoordinatorConfig) -> Self {
        Self { config }
    }

    /// Dispatches `result` to every configured renderer in parallel and
    /// returns one outcome per renderer, in configuration order (spec
    /// §4.14 "dispatches to external renderers in parallel ... Returns the
    /// resulting artifact paths").
    pub async fn dispatch(&self, result: &ScanResult) -> Vec<RenderOutcome> {
        let payload = match serde_json::to_vec(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize scan result for report rendering");
                return self
                    .config
                    .renderers
                    .iter()
                    .map(|r| RenderOutcome::Warning {
                        format: r.format.clone(),
                        message: format!("serialize scan result: {e}"),
                    })
                    .collect();
            }
        };

        let futures = self
            .config
            .renderers
            .iter()
            .map(|spec| Self::render_one(spec, &payload, self.config.timeout));

        futures::future::join_all(futures).await
    }

    async fn render_one(spec: &RendererSpec, payload: &[u8], timeout: Duration) -> RenderOutcome {
        let spawned = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(format = %spec.format, error = %e, "report renderer failed to spawn");
                return RenderOutcome::Warning {
                    format: spec.format.clone(),
                    message: format!("spawn failed: {e}"),
                };
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(payload).await {
                warn!(format = %spec.format, error = %e, "failed to write scan result to renderer stdin");
                return RenderOutcome::Warning {
                    format: spec.format.clone(),
                    message: format!("write stdin: {e}"),
                };
            }
        }

        let run = async {
            let mut stdout = child.stdout.take().expect("stdout was piped");
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, buf))
        };

        match tokio::time::timeout(timeout, run).await {
            Err(_) => {
                warn!(format = %spec.format, "report renderer timed out");
                RenderOutcome::Warning {
                    format: spec.format.clone(),
                    message: "timed out".to_string(),
                }
            }
            Ok(Err(e)) => {
                warn!(format = %spec.format, error = %e, "report renderer I/O error");
                RenderOutcome::Warning {
                    format: spec.format.clone(),
                    message: e.to_string(),
                }
            }
            Ok(Ok((status, buf))) => {
                if !status.success() {
                    warn!(format = %spec.format, code = ?status.code(), "report renderer exited non-zero");
                    return RenderOutcome::Warning {
                        format: spec.format.clone(),
                        message: format!("exited with status {:?}", status.code()),
                    };
                }
                let path = String::from_utf8_lossy(&buf).trim().to_string();
                if path.is_empty() {
                    RenderOutcome::Warning {
                        format: spec.format.clone(),
                        message: "renderer produced no artifact path".to_string(),
                    }
                } else {
                    RenderOutcome::Artifact {
                        format: spec.format.clone(),
                        path,
                    }
                }
            }
        }
    }
}
