//! Subprocess kernel speaking JSON lines over stdin/stdout.
//!
//! The default interpreter is `python3` running the embedded
//! [`DRIVER_SOURCE`]; any program that implements the protocol works.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use nbdocs_shared::{DRIVER_PLACEHOLDER, KernelConfig, NbdocsError, Result};

use crate::protocol::{RequestMessage, ResponseMessage};
use crate::{
    CellError, CellOutcome, ExecuteRequest, Kernel, KernelFactory, KernelInfo, KernelStart,
};

/// Python driver implementing the kernel side of the protocol.
pub const DRIVER_SOURCE: &str = include_str!("../driver/kernel_driver.py");

/// How long a kernel gets to exit after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Launch settings & factory
// ---------------------------------------------------------------------------

/// How to launch a bridge kernel.
#[derive(Debug, Clone)]
pub struct BridgeSpec {
    /// Interpreter executable.
    pub command: String,
    /// Arguments; `{driver}` is replaced by [`DRIVER_SOURCE`].
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Per-cell time limit (`None` = unlimited).
    pub cell_timeout: Option<Duration>,
    /// Limit on waiting for the ready handshake.
    pub startup_timeout: Duration,
}

impl From<&KernelConfig> for BridgeSpec {
    fn from(config: &KernelConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            cell_timeout: (config.cell_timeout_secs > 0)
                .then(|| Duration::from_secs(config.cell_timeout_secs)),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs.max(1)),
        }
    }
}

impl BridgeSpec {
    /// Arguments with the driver placeholder substituted.
    pub fn resolved_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(DRIVER_PLACEHOLDER, DRIVER_SOURCE))
            .collect()
    }
}

/// Starts a fresh [`BridgeKernel`] per notebook.
#[derive(Debug, Clone)]
pub struct BridgeFactory {
    spec: BridgeSpec,
}

impl BridgeFactory {
    pub fn new(spec: BridgeSpec) -> Self {
        Self { spec }
    }
}

impl KernelFactory for BridgeFactory {
    type Kernel = BridgeKernel;

    async fn start(&self, start: KernelStart<'_>) -> Result<BridgeKernel> {
        BridgeKernel::spawn(&self.spec, start).await
    }
}

// ---------------------------------------------------------------------------
// Bridge kernel
// ---------------------------------------------------------------------------

/// Handle to a spawned kernel subprocess.
pub struct BridgeKernel {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    request_counter: u64,
    cell_timeout: Option<Duration>,
    info: KernelInfo,
    document: String,
}

impl BridgeKernel {
    /// Spawn the subprocess and wait for its ready handshake.
    #[instrument(skip_all, fields(document = %start.document, cmd = %spec.command))]
    pub async fn spawn(spec: &BridgeSpec, start: KernelStart<'_>) -> Result<Self> {
        info!(cwd = %start.working_dir.display(), "spawning kernel");

        let mut child = Command::new(&spec.command)
            .args(spec.resolved_args())
            .envs(&spec.env)
            .current_dir(start.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Kernel diagnostics go to parent stderr
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                NbdocsError::Kernel(format!(
                    "failed to spawn kernel: {e}. Is `{}` installed?",
                    spec.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NbdocsError::Kernel("failed to capture kernel stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NbdocsError::Kernel("failed to capture kernel stdout".into()))?;

        let mut kernel = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            request_counter: 0,
            cell_timeout: spec.cell_timeout,
            info: KernelInfo::default(),
            document: start.document.to_string(),
        };

        let ready = match timeout(spec.startup_timeout, kernel.read_message()).await {
            Ok(msg) => msg?,
            Err(_) => {
                kernel.kill().await;
                return Err(NbdocsError::Kernel(format!(
                    "kernel did not become ready within {}s",
                    spec.startup_timeout.as_secs()
                )));
            }
        };

        match ready {
            ResponseMessage::Ready { language, version } => {
                info!(?language, ?version, "kernel is ready");
                kernel.info = KernelInfo { language, version };
                Ok(kernel)
            }
            other => Err(NbdocsError::Kernel(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    /// Read the next protocol message, skipping blank lines.
    async fn read_message(&mut self) -> Result<ResponseMessage> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| NbdocsError::Kernel(format!("kernel read error: {e}")))?;

            let Some(line) = line else {
                let status = self.child.try_wait().ok().flatten();
                return Err(NbdocsError::Kernel(format!(
                    "kernel closed stdout unexpectedly (status: {})",
                    status.map_or_else(|| "running".to_string(), |s| s.to_string())
                )));
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            return serde_json::from_str(line).map_err(|e| {
                NbdocsError::Kernel(format!(
                    "invalid kernel message: {e} (got: {})",
                    line.chars().take(200).collect::<String>()
                ))
            });
        }
    }

    async fn send(&mut self, msg: &RequestMessage<'_>) -> Result<()> {
        let mut json = serde_json::to_string(msg)
            .map_err(|e| NbdocsError::Kernel(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        self.stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| NbdocsError::Kernel(format!("failed to write to kernel stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| NbdocsError::Kernel(format!("failed to flush kernel stdin: {e}")))
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(document = %self.document, "failed to kill kernel: {e}");
        }
    }
}

impl Kernel for BridgeKernel {
    fn info(&self) -> &KernelInfo {
        &self.info
    }

    async fn execute(&mut self, request: ExecuteRequest<'_>) -> Result<CellOutcome> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        self.send(&RequestMessage::Execute {
            id: id.clone(),
            cell_index: request.cell_index,
            code: request.code,
        })
        .await?;

        let response = match self.cell_timeout {
            Some(limit) => match timeout(limit, self.read_message()).await {
                Ok(msg) => msg?,
                Err(_) => {
                    self.kill().await;
                    return Err(NbdocsError::cell(
                        request.cell_index,
                        format!("cell timed out after {}s", limit.as_secs_f64()),
                    ));
                }
            },
            None => self.read_message().await?,
        };

        match response {
            ResponseMessage::Result {
                id: resp_id,
                outputs,
            } if resp_id == id => {
                debug!(cell = request.cell_index, outputs = outputs.len(), "cell completed");
                Ok(CellOutcome::Completed { outputs })
            }
            ResponseMessage::Error {
                id: resp_id,
                ename,
                evalue,
                traceback,
                outputs,
            } if resp_id == id => {
                debug!(cell = request.cell_index, %ename, "cell raised");
                Ok(CellOutcome::Failed {
                    outputs,
                    error: CellError {
                        ename,
                        evalue,
                        traceback,
                    },
                })
            }
            other => Err(NbdocsError::Kernel(format!(
                "unexpected response to {id}: {other:?}"
            ))),
        }
    }

    async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.send(&RequestMessage::Shutdown).await {
            debug!("shutdown request not delivered: {e}");
        }

        let Self {
            mut child, stdin, ..
        } = self;
        drop(stdin);

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "kernel exited");
            }
            Ok(Err(e)) => {
                warn!("kernel wait error: {e}");
            }
            Err(_) => {
                warn!("kernel ignored shutdown, killing it");
                let _ = child.kill().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbdocs_notebook::{Output, StreamName};
    use std::path::Path;

    fn sh_spec(script: &str) -> BridgeSpec {
        BridgeSpec {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
            cell_timeout: Some(Duration::from_secs(5)),
            startup_timeout: Duration::from_secs(5),
        }
    }

    fn start() -> KernelStart<'static> {
        KernelStart {
            working_dir: Path::new("."),
            document: "test",
        }
    }

    #[test]
    fn driver_placeholder_is_substituted() {
        let spec = BridgeSpec::from(&KernelConfig::default());
        let args = spec.resolved_args();
        assert_eq!(args[0], "-u");
        assert_eq!(args[1], "-c");
        assert_eq!(args[2], DRIVER_SOURCE);
        assert_eq!(spec.cell_timeout, Some(Duration::from_secs(600)));
        assert_eq!(spec.env.get("MPLBACKEND").map(String::as_str), Some("Agg"));
    }

    #[test]
    fn zero_cell_timeout_means_unlimited() {
        let config = KernelConfig {
            cell_timeout_secs: 0,
            ..KernelConfig::default()
        };
        assert_eq!(BridgeSpec::from(&config).cell_timeout, None);
    }

    #[test]
    fn driver_speaks_the_protocol() {
        assert!(DRIVER_SOURCE.contains("\"ready\""));
        assert!(DRIVER_SOURCE.contains("\"shutdown\""));
        assert!(DRIVER_SOURCE.contains("image/png"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_kernel_error() {
        let mut spec = sh_spec("");
        spec.command = "nbdocs-no-such-interpreter".into();
        let err = BridgeKernel::spawn(&spec, start()).await.err().expect("spawn must fail");
        assert!(matches!(err, NbdocsError::Kernel(_)));
        assert!(err.to_string().contains("failed to spawn kernel"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scripted_kernel_completes_a_cell() {
        let script = r#"
printf '%s\n' '{"type":"ready","language":"sh"}'
read req
printf '%s\n' '{"type":"result","id":"req-1","outputs":[{"output_type":"stream","name":"stdout","text":"hi\n"}]}'
read req
"#;
        let mut kernel = BridgeKernel::spawn(&sh_spec(script), start()).await.unwrap();
        assert_eq!(kernel.info().language.as_deref(), Some("sh"));

        let outcome = kernel
            .execute(ExecuteRequest {
                cell_index: 0,
                code: "echo hi",
            })
            .await
            .unwrap();

        match outcome {
            CellOutcome::Completed { outputs } => {
                assert_eq!(outputs.len(), 1);
                assert!(matches!(
                    &outputs[0],
                    Output::Stream { name: StreamName::Stdout, text } if text.as_str() == "hi\n"
                ));
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        kernel.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scripted_kernel_reports_cell_error() {
        let script = r#"
printf '%s\n' '{"type":"ready"}'
read req
printf '%s\n' '{"type":"error","id":"req-1","ename":"ZeroDivisionError","evalue":"division by zero","traceback":[]}'
read req
"#;
        let mut kernel = BridgeKernel::spawn(&sh_spec(script), start()).await.unwrap();
        let outcome = kernel
            .execute(ExecuteRequest {
                cell_index: 4,
                code: "1 / 0",
            })
            .await
            .unwrap();

        match outcome {
            CellOutcome::Failed { error, outputs } => {
                assert!(outputs.is_empty());
                assert_eq!(error.summary(), "ZeroDivisionError: division by zero");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        kernel.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_cell_times_out() {
        let script = r#"
printf '%s\n' '{"type":"ready"}'
read req
sleep 10
"#;
        let mut spec = sh_spec(script);
        spec.cell_timeout = Some(Duration::from_millis(200));

        let mut kernel = BridgeKernel::spawn(&spec, start()).await.unwrap();
        let err = kernel
            .execute(ExecuteRequest {
                cell_index: 0,
                code: "while True: pass",
            })
            .await
            .unwrap_err();

        match err {
            NbdocsError::CellExecution { index, message } => {
                assert_eq!(index, 0);
                assert!(message.contains("timed out"));
            }
            other => panic!("expected CellExecution, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kernel_exiting_before_ready_is_reported() {
        let err = BridgeKernel::spawn(&sh_spec("exit 3"), start())
            .await
            .err()
            .expect("spawn must fail");
        assert!(err.to_string().contains("closed stdout"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_kernel_hits_startup_timeout() {
        let mut spec = sh_spec("sleep 10");
        spec.startup_timeout = Duration::from_millis(200);
        let err = BridgeKernel::spawn(&spec, start()).await.err().expect("spawn must fail");
        assert!(err.to_string().contains("did not become ready"), "{err}");
    }

    // -----------------------------------------------------------------------
    // Embedded Python driver
    // -----------------------------------------------------------------------

    fn python3_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    /// The default kernel, or `None` when no `python3` is on PATH.
    async fn python_kernel() -> Option<BridgeKernel> {
        if !python3_available() {
            eprintln!("python3 not found; skipping driver test");
            return None;
        }
        let spec = BridgeSpec::from(&KernelConfig::default());
        Some(BridgeKernel::spawn(&spec, start()).await.unwrap())
    }

    async fn run(kernel: &mut BridgeKernel, cell_index: usize, code: &str) -> CellOutcome {
        kernel
            .execute(ExecuteRequest { cell_index, code })
            .await
            .unwrap()
    }

    async fn outputs_of(kernel: &mut BridgeKernel, cell_index: usize, code: &str) -> Vec<Output> {
        match run(kernel, cell_index, code).await {
            CellOutcome::Completed { outputs } => outputs,
            other => panic!("cell {cell_index} should complete, got {other:?}"),
        }
    }

    fn result_text(output: &Output) -> Option<String> {
        match output {
            Output::ExecuteResult { data, .. } => {
                data.get("text/plain").and_then(nbdocs_notebook::mime_text)
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn python_driver_captures_stdout_and_trailing_value() {
        let Some(mut kernel) = python_kernel().await else {
            return;
        };
        assert_eq!(kernel.info().language.as_deref(), Some("python"));

        let outputs = outputs_of(&mut kernel, 0, "print('hi')\n1+1").await;
        assert_eq!(outputs.len(), 2);
        assert!(matches!(
            &outputs[0],
            Output::Stream { name: StreamName::Stdout, text } if text.as_str() == "hi\n"
        ));
        assert_eq!(result_text(&outputs[1]).as_deref(), Some("2"));

        // Namespace persists across cells.
        assert!(outputs_of(&mut kernel, 1, "x = 5").await.is_empty());
        let outputs = outputs_of(&mut kernel, 2, "x * 2").await;
        assert_eq!(result_text(&outputs[0]).as_deref(), Some("10"));

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn python_driver_semicolon_suppresses_value() {
        let Some(mut kernel) = python_kernel().await else {
            return;
        };

        assert!(outputs_of(&mut kernel, 0, "x = 5\nx;").await.is_empty());
        assert!(outputs_of(&mut kernel, 1, "x; # quiet").await.is_empty());

        let outputs = outputs_of(&mut kernel, 2, "'a;b'").await;
        assert_eq!(result_text(&outputs[0]).as_deref(), Some("'a;b'"));

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn python_driver_keeps_protocol_channel_clean() {
        let Some(mut kernel) = python_kernel().await else {
            return;
        };

        let code = "import os, sys\n\
                    os.write(1, b'{\"type\": \"result\"}\\n')\n\
                    sys.__stdout__.write('raw\\n')\n\
                    print('captured')";
        let outputs = outputs_of(&mut kernel, 0, code).await;
        assert_eq!(outputs.len(), 1);
        assert!(matches!(
            &outputs[0],
            Output::Stream { name: StreamName::Stdout, text } if text.as_str() == "captured\n"
        ));

        let outputs = outputs_of(&mut kernel, 1, "1+1").await;
        assert_eq!(result_text(&outputs[0]).as_deref(), Some("2"));

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn python_driver_reports_exceptions_and_system_exit() {
        let Some(mut kernel) = python_kernel().await else {
            return;
        };

        match run(&mut kernel, 3, "raise ValueError('bad')").await {
            CellOutcome::Failed { error, .. } => {
                assert_eq!(error.summary(), "ValueError: bad");
                assert!(error.traceback.iter().any(|l| l.contains("<cell-3>")));
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        match run(&mut kernel, 4, "raise SystemExit(3)").await {
            CellOutcome::Failed { error, .. } => assert_eq!(error.summary(), "SystemExit: 3"),
            other => panic!("expected Failed, got {other:?}"),
        }

        // The kernel survives both.
        let outputs = outputs_of(&mut kernel, 5, "1+1").await;
        assert_eq!(result_text(&outputs[0]).as_deref(), Some("2"));

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn python_driver_captures_matplotlib_figures() {
        let Some(mut kernel) = python_kernel().await else {
            return;
        };

        let check = "import importlib.util\nimportlib.util.find_spec('matplotlib') is not None";
        let outputs = outputs_of(&mut kernel, 0, check).await;
        if result_text(&outputs[0]).as_deref() != Some("True") {
            eprintln!("matplotlib not installed; skipping figure capture");
            kernel.shutdown().await.unwrap();
            return;
        }

        let outputs = outputs_of(&mut kernel, 1, "import matplotlib\nmatplotlib.get_backend()").await;
        assert_eq!(
            result_text(&outputs[0]).map(|s| s.to_ascii_lowercase()).as_deref(),
            Some("'agg'")
        );

        let outputs = outputs_of(
            &mut kernel,
            2,
            "import matplotlib.pyplot as plt\nplt.plot([1, 2, 3]);",
        )
        .await;
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            Output::DisplayData { data, .. } => {
                let png = data.get("image/png").and_then(nbdocs_notebook::mime_text).unwrap();
                assert!(png.starts_with("iVBORw0KGgo"), "not a PNG payload");
            }
            other => panic!("expected display_data, got {other:?}"),
        }

        kernel.shutdown().await.unwrap();
    }
}
