//! Shell quoting for remote command lines
//!
//! Every value interpolated into a command sent to the remote shell goes
//! through [`quote`]. Remote hosts always run a POSIX shell, so the unix
//! rules apply regardless of the platform the runner is built for.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quotes a value for use as a single word in a POSIX shell command
///
/// Values made only of safe characters are returned unchanged; anything else
/// is wrapped in single quotes with embedded quotes escaped.
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Builds a `NAME=value` assignment line with the value quoted
pub fn assignment(name: &str, value: &str) -> String {
    format!("{}={}", name, quote(value))
}
