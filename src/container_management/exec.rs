//! Remote command execution inside devices.
//!
//! Every exec goes through the same create, start, inspect sequence. The
//! runtime reports a missing binary only as text inside the output, so the
//! output is scanned with [`classify_launch_failure`] whatever its shape.

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use regex::Regex;
use std::sync::OnceLock;

use super::machine_manager::MachineManager;
use super::types::{ContainerHandle, ExecChunk, ExecOutput, ExecSpec, ExecStartOptions};
use crate::error_handling::types::{BackendError, ManagerError};

const OCI_EXEC_FAILED: &str = "OCI runtime exec failed";
const NOT_IN_PATH: &str = "executable file not found in $PATH";
const NO_SUCH_FILE: &str = "no such file or directory";

/// Flags of a single exec session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOptions {
    pub stdin: bool,
    pub tty: bool,
    pub privileged: bool,
    pub user: String,
    pub environment: Option<Vec<String>>,
    pub workdir: Option<String>,
    /// Return the output as a lazy chunk stream.
    pub stream: bool,
    /// Keep stdout and stderr apart.
    pub demux: bool,
}

#[derive(Debug)]
pub struct ExecResult {
    /// `None` when the runtime did not know the exit status yet.
    pub exit_code: Option<i64>,
    pub output: ExecOutput,
}

fn quoted_token() -> &'static Regex {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    QUOTED.get_or_init(|| Regex::new(r#""([^"]*)""#).expect("quoted token pattern is valid"))
}

/// Returns the binary name when `output` carries the runtime's launch
/// failure signature for a missing or non-executable binary.
pub fn classify_launch_failure(output: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(output);
    if !text.contains(OCI_EXEC_FAILED) {
        return None;
    }
    if !text.contains(NOT_IN_PATH) && !text.contains(NO_SUCH_FILE) {
        return None;
    }
    let binary = quoted_token()
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Some(binary)
}

fn check_segments<'a, I>(segments: I) -> Result<(), ManagerError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    for segment in segments {
        if let Some(binary) = classify_launch_failure(segment) {
            return Err(ManagerError::MachineBinary { binary });
        }
    }
    Ok(())
}

/// Scans `output` for a launch failure and hands back an equivalent output.
///
/// A stream is read up to its first chunk carrying data, which is checked.
/// Everything read is then put back in front of the remaining chunks.
async fn inspect_output(output: ExecOutput) -> Result<ExecOutput, ManagerError> {
    match output {
        ExecOutput::Stream(mut chunks) => {
            let mut peeked = Vec::new();
            loop {
                let Some(chunk) = chunks.next().await else {
                    // the source is exhausted and must not be polled again
                    return Ok(ExecOutput::Stream(stream::iter(peeked).boxed()));
                };
                let chunk = chunk?;
                let has_data = chunk.segments().into_iter().any(|segment| !segment.is_empty());
                if has_data {
                    check_segments(chunk.segments())?;
                }
                peeked.push(Ok::<ExecChunk, BackendError>(chunk));
                if has_data {
                    break;
                }
            }
            let rechained = stream::iter(peeked).chain(chunks).boxed();
            Ok(ExecOutput::Stream(rechained))
        }
        collected => {
            check_segments(collected.collected_segments())?;
            Ok(collected)
        }
    }
}

impl MachineManager {
    /// Runs `command` inside the container behind `handle`.
    pub async fn exec_run(
        &self,
        handle: &ContainerHandle,
        command: Vec<String>,
        options: ExecOptions,
    ) -> Result<ExecResult, ManagerError> {
        let spec = ExecSpec {
            cmd: command,
            stdout: true,
            stderr: true,
            stdin: options.stdin,
            tty: options.tty,
            privileged: options.privileged,
            user: options.user,
            environment: options.environment,
            workdir: options.workdir,
        };
        debug!("Exec on {}: {:?}", handle.name, spec.cmd);
        let exec_id = self.backend.exec_create(&handle.id, &spec).await?;

        let start = ExecStartOptions {
            detach: false,
            tty: options.tty,
            stream: options.stream,
            socket: false,
            demux: options.demux,
        };
        let output = self.backend.exec_start(&exec_id, &start).await?;
        let inspected = self.backend.exec_inspect(&exec_id).await?;

        let output = inspect_output(output).await.map_err(|e| {
            warn!("Exec on {} failed to launch: {}", handle.name, e);
            e
        })?;
        Ok(ExecResult {
            exit_code: inspected.exit_code,
            output,
        })
    }

    /// Runs `command` on the device `machine_name` of lab `lab_hash`,
    /// streaming demultiplexed output.
    ///
    /// When several containers match, the oldest one is used (ties broken
    /// by container id).
    pub async fn exec(
        &self,
        lab_hash: &str,
        machine_name: &str,
        command: Vec<String>,
        tty: bool,
    ) -> Result<ExecResult, ManagerError> {
        let user = if self.settings.shared_cd {
            None
        } else {
            Some(self.user.as_str())
        };
        let mut matches = self
            .get_machines_api_objects_by_filters(Some(lab_hash), Some(machine_name), user)
            .await?;
        if matches.is_empty() {
            return Err(ManagerError::MachineNotFound(format!(
                "`{}` in lab `{}`",
                machine_name, lab_hash
            )));
        }
        if matches.len() > 1 {
            info!(
                "{} containers match device {}, using the oldest",
                matches.len(),
                machine_name
            );
        }
        matches.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        let handle = matches.remove(0);

        let options = ExecOptions {
            tty,
            stream: true,
            demux: true,
            ..ExecOptions::default()
        };
        self.exec_run(&handle, command, options).await
    }
}
