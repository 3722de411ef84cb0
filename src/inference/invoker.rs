use std::process::Stdio;

use anyhow::Result;
use axum::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::inference::bridge::{PredictHandler, PredictorError};
use crate::inference::request::PredictionRequest;

/// Runs `<program> <args..> <json>` once per prediction.
#[derive(Debug, Clone)]
pub struct SubprocessPredictor {
    program: String,
    args: Vec<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterCheck {
    pub success: bool,
    pub interpreter_output: String,
    pub interpreter_error: String,
}

impl SubprocessPredictor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Spawns the predictor with `argument` appended and waits for it to exit.
    ///
    /// Both output streams are buffered in full. The child is killed if the
    /// returned future is dropped before it exits.
    #[tracing::instrument(level = "info", skip(self, argument), fields(program = %self.program))]
    pub async fn invoke(&self, argument: &str) -> Result<Value, PredictorError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(argument)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PredictorError::Spawn(format!("{}: {}", self.program, e)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PredictorError::Spawn(format!("{}: {}", self.program, e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(stdout = %stdout, stderr = %stderr, "Predictor exited with {}", output.status);

        if !output.status.success() {
            return Err(PredictorError::SubprocessFailure {
                code: output.status.code(),
                stderr: stderr.into_owned(),
            });
        }
        parse_output(&stdout)
    }

    /// Runs `<program> --version` to report whether the interpreter is usable.
    pub async fn check_interpreter(&self) -> Result<InterpreterCheck> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(InterpreterCheck {
            success: output.status.success(),
            interpreter_output: String::from_utf8_lossy(&output.stdout).into_owned(),
            interpreter_error: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl PredictHandler for SubprocessPredictor {
    async fn run_predict(&self, request: &PredictionRequest) -> Result<Value, PredictorError> {
        let argument = serde_json::to_string(request)
            .map_err(|e| PredictorError::Validation(e.to_string()))?;
        self.invoke(&argument).await
    }
}

/// Parses the predictor's output as one JSON document, ignoring surrounding whitespace.
pub fn parse_output(raw: &str) -> Result<Value, PredictorError> {
    serde_json::from_str(raw.trim()).map_err(|_| PredictorError::MalformedOutput(raw.to_string()))
}
