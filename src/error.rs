use std::io;

/// Errors surfaced at the CLI boundary, mapped to the exit codes documented
/// for the binary: 0 success, 1 general failure, 2 bad parameters, 3 stdout
/// is not a terminal.
#[derive(thiserror::Error, Debug)]
pub enum TimgError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("could not decode image or video: {0}")]
    Decode(String),

    #[error("could not scale frame: {0}")]
    Scale(String),

    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("output is not a terminal; pass -g<width>x<height> to force a size")]
    NotATerminal,
}

impl TimgError {
    pub fn exit_code(&self) -> i32 {
        match self {
            TimgError::Parameter(_) => 2,
            TimgError::NotATerminal => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, TimgError>;
