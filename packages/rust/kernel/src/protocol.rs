//! JSON-lines wire messages exchanged with the kernel driver.

use nbdocs_notebook::Output;

/// Request message sent to the kernel.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type")]
pub(crate) enum RequestMessage<'a> {
    #[serde(rename = "execute")]
    Execute {
        id: String,
        cell_index: usize,
        code: &'a str,
    },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response message received from the kernel.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    #[serde(rename = "result")]
    Result {
        id: String,
        #[serde(default)]
        outputs: Vec<Output>,
    },
    #[serde(rename = "error")]
    Error {
        id: String,
        ename: String,
        #[serde(default)]
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
        #[serde(default)]
        outputs: Vec<Output>,
    },
}
