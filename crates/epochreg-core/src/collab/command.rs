use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EpochRegError, Result};

use super::{
    AlignRequest, BackPropagator, CombineOutput, CombineRequest, Combiner, DetectionParams,
    PropagationOutcome, PropagationRequest, Registrar, TemplateArtifacts, TemplateRequest,
    TemplateScaler,
};

const DEFAULT_TOOL: &str = "epochreg-tools";

/// An external program invoked as `program args.. <operation>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_TOOL.to_string(),
            args: Vec::new(),
        }
    }
}

/// External programs per collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub combiner: ToolCommand,
    pub registrar: ToolCommand,
    pub propagator: ToolCommand,
    pub template_scaler: ToolCommand,
}

/// Runs collaborator operations as subprocesses.
///
/// The JSON-encoded request goes to stdin; the response is read as JSON
/// from stdout. Empty output decodes as `null`. The process runs in the
/// unit's working directory.
#[derive(Clone, Debug)]
pub struct CommandBackend {
    command: ToolCommand,
}

#[derive(Serialize)]
struct HotPixelRequest<'a> {
    first: &'a Path,
    second: &'a Path,
}

#[derive(Serialize)]
struct CatalogRequest<'a> {
    image: &'a Path,
    detection: &'a DetectionParams,
}

#[derive(Deserialize)]
struct AlignResponse {
    wcs_name: String,
}

#[derive(Deserialize)]
struct CatalogResponse {
    catalog: PathBuf,
}

impl CommandBackend {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    fn call<Req, Resp>(&self, operation: &str, workdir: &Path, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let program = &self.command.program;
        let payload = serde_json::to_vec(request)
            .map_err(|e| EpochRegError::collaborator(operation, e.to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(&self.command.args)
            .arg(operation)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(?cmd, "Running collaborator");

        let mut child = cmd.spawn().map_err(|e| {
            EpochRegError::collaborator(operation, format!("cannot start {program}: {e}"))
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload)?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EpochRegError::collaborator(
                operation,
                format!("{program} exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let body = match stdout.trim() {
            "" => "null",
            body => body,
        };
        serde_json::from_str(body).map_err(|e| {
            EpochRegError::collaborator(operation, format!("malformed response: {e}"))
        })
    }
}

impl Combiner for CommandBackend {
    fn combine(&self, request: &CombineRequest) -> Result<CombineOutput> {
        self.call("combine", &request.workdir, request)
    }

    fn clean_hot_pixels(&self, workdir: &Path, first: &Path, second: &Path) -> Result<()> {
        self.call("clean-hot-pixels", workdir, &HotPixelRequest { first, second })
    }
}

impl Registrar for CommandBackend {
    fn align(&self, request: &AlignRequest) -> Result<String> {
        let response: AlignResponse = self.call("align", &request.workdir, request)?;
        Ok(response.wcs_name)
    }

    fn source_catalog(
        &self,
        workdir: &Path,
        image: &Path,
        detection: &DetectionParams,
    ) -> Result<PathBuf> {
        let response: CatalogResponse =
            self.call("source-catalog", workdir, &CatalogRequest { image, detection })?;
        Ok(workdir.join(response.catalog))
    }
}

impl BackPropagator for CommandBackend {
    fn propagate(&self, request: &PropagationRequest) -> Result<PropagationOutcome> {
        self.call("propagate", &request.workdir, request)
    }
}

impl TemplateScaler for CommandBackend {
    fn scaled_template(&self, request: &TemplateRequest) -> Result<TemplateArtifacts> {
        self.call("scaled-template", &request.workdir, request)
    }
}
