//! Protocol-level errors: the ACK framing described in the wire protocol
//! (`ACK [<code>@<listindex>] {<command>} <message>`).
//!
//! Everything else in the crate reports through `color_eyre::Result`; this
//! type exists only at the command-dispatch boundary, where an internal
//! error has to be translated into one line of wire protocol.

use std::fmt;

/// Numeric ACK codes, matching the protocol's error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    NotList = 1,
    Arg = 2,
    Password = 3,
    Permission = 4,
    Unknown = 5,
    NoExist = 50,
    PlaylistMax = 51,
    System = 52,
    PlaylistLoad = 53,
    UpdateAlready = 54,
    PlayerSync = 55,
    Exist = 56,
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

/// A command-handler error, carrying everything needed to write the `ACK`
/// line back to the client. The list index is filled in by the caller
/// (singleton commands use 0; command-list members use their 0-based
/// position) since a handler has no way to know it in advance.
#[derive(Debug, thiserror::Error)]
#[error("{code} {message}")]
pub struct AckError {
    pub code: AckCode,
    pub message: String,
}

impl AckError {
    pub fn new(code: AckCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn arg(message: impl Into<String>) -> Self {
        Self::new(AckCode::Arg, message)
    }

    pub fn no_exist(message: impl Into<String>) -> Self {
        Self::new(AckCode::NoExist, message)
    }

    pub fn permission() -> Self {
        Self::new(AckCode::Permission, "you don't have permission for \"this\"")
    }

    pub fn unknown(command: &str) -> Self {
        Self::new(AckCode::Unknown, format!("unknown command \"{command}\""))
    }

    pub fn not_list(command: &str) -> Self {
        Self::new(
            AckCode::NotList,
            format!("command \"{command}\" not allowed in a command list"),
        )
    }

    /// Render the `ACK [<code>@<listindex>] {<command>} <message>\n` line.
    pub fn render(&self, command: &str, list_index: usize) -> String {
        format!(
            "ACK [{}@{}] {{{}}} {}\n",
            self.code, list_index, command, self.message
        )
    }
}

/// Bridges an internal, unexpected `color_eyre::Report` into a SYSTEM ack.
/// Used at dispatch for handlers whose error arm is `color_eyre::Result`
/// rather than `AckError` directly (e.g. anything touching the out-of-scope
/// database/decoder/output collaborators).
impl From<color_eyre::Report> for AckError {
    fn from(report: color_eyre::Report) -> Self {
        AckError::new(AckCode::System, format!("{report:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ack_line() {
        let err = AckError::no_exist("No such song");
        assert_eq!(
            err.render("deleteid", 2),
            "ACK [50@2] {deleteid} No such song\n"
        );
    }

    #[test]
    fn renders_singleton_index_zero() {
        let err = AckError::arg("Bad integer");
        assert_eq!(err.render("setvol", 0), "ACK [2@0] {setvol} Bad integer\n");
    }
}
