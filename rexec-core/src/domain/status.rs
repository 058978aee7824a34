//! Retrieval output framing
//!
//! The retrieval script always prints at least one line. The first line is the
//! status line, either `RUNNING` or `DONE <exitcode>`; every following line is
//! job output accumulated since the previous retrieval.

/// Parsed status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLine {
    Running,
    /// Job finished. A bare `DONE` carries exit code 0.
    Done(i32),
}

/// How well the first line of a frame matched the status line contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    /// `RUNNING`, `DONE` or `DONE <digits>` with a code fitting an `i32`
    Valid,
    /// A `DONE` line whose code had to be substituted
    MalformedExitCode,
    /// Not a status line; the job is considered still running
    Missing,
}

impl StatusLine {
    /// Parses a single status line
    ///
    /// See [`StatusLine::parse_checked`] for the rules.
    pub fn parse(line: &str) -> Option<Self> {
        Self::parse_checked(line).map(|(status, _)| status)
    }

    /// Parses a single status line, telling whether it was well formed
    ///
    /// `RUNNING`, `DONE` and `DONE <digits>` are valid; trailing whitespace
    /// is ignored. Any other line starting with the word `DONE` still ends
    /// the job: a numeric code is clamped to the `i32` range, anything else
    /// becomes 0. Lines that are neither yield `None`.
    pub fn parse_checked(line: &str) -> Option<(Self, bool)> {
        let line = line.trim_end();

        if line == "RUNNING" {
            return Some((StatusLine::Running, true));
        }

        let rest = line.strip_prefix("DONE")?;
        if rest.is_empty() {
            return Some((StatusLine::Done(0), true));
        }
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }

        if let Some(digits) = rest.strip_prefix(' ') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return Some(match digits.parse::<i32>() {
                    Ok(code) => (StatusLine::Done(code), true),
                    Err(_) => (StatusLine::Done(i32::MAX), false),
                });
            }
        }

        let code = rest.trim();
        let exit_code = match code.parse::<i64>() {
            Ok(code) => code.clamp(i32::MIN.into(), i32::MAX.into()) as i32,
            Err(_) if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) => i32::MAX,
            Err(_) => 0,
        };
        Some((StatusLine::Done(exit_code), false))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StatusLine::Running => None,
            StatusLine::Done(code) => Some(*code),
        }
    }
}

/// Normalized update derived from either delivery channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedFrame {
    /// Exit code, present only when the job reached a terminal status
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RetrievedFrame {
    /// Interprets the raw output of the retrieval command
    ///
    /// Returns `None` when stdout is empty: there is nothing new to report.
    /// The first line is always consumed as the status line, whatever the
    /// [`StatusCheck`] says about it.
    pub fn from_retrieval(stdout: &str, stderr: &str) -> Option<(Self, StatusCheck)> {
        if stdout.is_empty() {
            return None;
        }

        let (first, rest) = split_first_line(stdout);
        let (status, check) = match StatusLine::parse_checked(first) {
            Some((status, true)) => (Some(status), StatusCheck::Valid),
            Some((status, false)) => (Some(status), StatusCheck::MalformedExitCode),
            None => (None, StatusCheck::Missing),
        };

        let frame = Self {
            exit_code: status.and_then(|s| s.exit_code()),
            stdout: rest.to_string(),
            stderr: stderr.to_string(),
        };

        Some((frame, check))
    }
}

fn split_first_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(idx) => (&text[..idx], &text[idx + 1..]),
        None => (text, ""),
    }
}

/// Removes a single leading `RUNNING...` or `DONE...` line
///
/// Pushed output carries the status line too, but the exit code arrives as a
/// separate field, so the line is dropped. A status line without a trailing
/// newline is left untouched.
pub fn strip_status_line(text: &str) -> &str {
    if text.starts_with("RUNNING") || text.starts_with("DONE") {
        if let Some(idx) = text.find('\n') {
            return &text[idx + 1..];
        }
    }
    text
}
