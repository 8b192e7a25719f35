//! Code execution kernels.
//!
//! A [`Kernel`] runs notebook code cells one at a time in a single persistent
//! interpreter state. A [`KernelFactory`] starts a fresh kernel per notebook.
//! The production implementation is [`BridgeKernel`]: an interpreter
//! subprocess driven over a JSON-lines stdin/stdout protocol.

mod bridge;
mod protocol;

use std::future::Future;
use std::path::Path;

use nbdocs_notebook::Output;
use nbdocs_shared::Result;

pub use bridge::{BridgeFactory, BridgeKernel, BridgeSpec, DRIVER_SOURCE};

/// One code cell to run.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteRequest<'a> {
    /// Position of the cell in the notebook's cell list.
    pub cell_index: usize,
    /// Cell source code.
    pub code: &'a str,
}

/// The error a cell raised.
#[derive(Debug, Clone, PartialEq)]
pub struct CellError {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl CellError {
    /// `"<ename>: <evalue>"`, or just the name when the value is empty.
    pub fn summary(&self) -> String {
        if self.evalue.is_empty() {
            self.ename.clone()
        } else {
            format!("{}: {}", self.ename, self.evalue)
        }
    }

    /// The error as an nbformat `error` output.
    pub fn to_output(&self) -> Output {
        Output::Error {
            ename: self.ename.clone(),
            evalue: self.evalue.clone(),
            traceback: self.traceback.clone(),
        }
    }
}

/// Result of running one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellOutcome {
    /// The cell ran to completion.
    Completed { outputs: Vec<Output> },
    /// The cell raised; `outputs` holds what it produced before raising.
    Failed { outputs: Vec<Output>, error: CellError },
}

/// What the kernel reported about itself at start-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelInfo {
    pub language: Option<String>,
    pub version: Option<String>,
}

/// Where and for what a kernel is started.
#[derive(Debug, Clone, Copy)]
pub struct KernelStart<'a> {
    /// Working directory of the kernel process (the notebook's directory).
    pub working_dir: &'a Path,
    /// Document name, for diagnostics.
    pub document: &'a str,
}

/// A running interpreter with persistent state across cells.
pub trait Kernel: Send {
    /// Information from the start-up handshake.
    fn info(&self) -> &KernelInfo;

    /// Run one cell to completion.
    ///
    /// `Err` means the kernel itself failed (protocol, crash, timeout), in
    /// which case it must not be used again. A cell raising is `Ok(Failed)`.
    fn execute(
        &mut self,
        request: ExecuteRequest<'_>,
    ) -> impl Future<Output = Result<CellOutcome>> + Send;

    /// Stop the kernel and wait for it to exit.
    fn shutdown(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized;
}

/// Starts fresh kernels.
pub trait KernelFactory: Send + Sync {
    type Kernel: Kernel;

    fn start(&self, start: KernelStart<'_>) -> impl Future<Output = Result<Self::Kernel>> + Send;
}
