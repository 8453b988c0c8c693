use std::path::PathBuf;

use device::DeviceError;
use thiserror::Error;

use crate::cryptsetup::Step;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("field {field:?} missing from the luksDump output")]
    FieldMissing { field: &'static str },

    #[error("field {field:?} is empty in the luksDump output")]
    FieldEmpty { field: &'static str },

    #[error("field {field:?} is not valid hex")]
    MalformedHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("no device path follows {keyword:?}")]
    DevicePathMissing { keyword: &'static str },

    #[error("no luks* operation given")]
    NoOperation,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to cryptsetup ({step})")]
    Io {
        step: Step,
        #[source]
        source: std::io::Error,
    },

    #[error("cryptsetup {step} exited with {}{}", exit_code(.code), diagnostics_suffix(.diagnostics))]
    ExitStatus {
        step: Step,
        code: Option<i32>,
        diagnostics: String,
    },
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by a signal)".to_string(),
    }
}

fn diagnostics_suffix(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Both the permanent key enrollment and the bootstrap removal failed.
    #[error("enrolling the device key failed ({enroll}) and removing the temporary key failed ({cleanup})")]
    Enrollment {
        enroll: Box<PipelineError>,
        cleanup: ToolError,
    },
}
