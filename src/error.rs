/*!
 * Error types for the Tango command-line client
 */

use std::fmt;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug)]
pub enum CliError {
    /// A required combination of flags was missing for the chosen command
    MissingArgument(String),

    /// A flag's value could not be parsed into the shape the command needs
    InvalidArgument(String),

    /// The input file list could not be read from disk or parsed as JSON
    InputFiles(String),

    /// The server could not be reached at all
    Connection(String),

    /// The server responded with a non-success status
    Server { status: u16, body: String },

    /// Local I/O failure (reading a file to upload, writing a downloaded one)
    Io(std::io::Error),

    /// Response body did not parse the way the command expected
    Decode(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::MissingArgument(msg) => write!(f, "missing argument: {msg}"),
            CliError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            CliError::InputFiles(msg) => write!(f, "input files: {msg}"),
            CliError::Connection(msg) => write!(f, "could not reach server: {msg}"),
            CliError::Server { status, body } => write!(f, "server returned {status}: {body}"),
            CliError::Io(e) => write!(f, "io error: {e}"),
            CliError::Decode(msg) => write!(f, "could not decode response: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<reqwest::Error> for CliError {
    fn from(e: reqwest::Error) -> Self {
        CliError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Decode(e.to_string())
    }
}
