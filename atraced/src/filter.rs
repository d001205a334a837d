//! Client-side event filtering: an optional library filter, an optional
//! function filter, an optional task-name substring filter, and an
//! "errors only" predicate, all AND-combined. Parsed from the trace
//! command's filter buffer (`trace_cmd_start`/`trace_cmd_run` in the
//! original): `LIB=name`, `FUNC=name`, `PROC=substring`, `ERRORS`.

use atrace_proto::{ErrorCheck, FunctionId, FunctionMetadata, LibId};
use std::fmt;

/// The only filter error: RUN sessions auto-target their own child process
/// and reject an explicit `PROC=` filter outright (SPEC_FULL.md §4.9).
/// Every other parse failure (an unrecognised keyword, an unknown library
/// or function name) is absorbed rather than rejected — see `parse`.
#[derive(Debug)]
pub enum FilterError {
    ProcNotAllowedInRun,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::ProcNotAllowedInRun => {
                write!(f, "PROC= is not allowed in a RUN filter; the run targets its own process")
            }
        }
    }
}

impl std::error::Error for FilterError {}

#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    /// `Some(None)` means `LIB=` named a library that doesn't exist — a
    /// sentinel that matches nothing rather than a parse failure.
    lib: Option<Option<LibId>>,
    /// `Some(None)` means `FUNC=` named an unknown function.
    func: Option<Option<FunctionId>>,
    task_substring: Option<String>,
    errors_only: bool,
}

impl ClientFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a whitespace-separated filter buffer for a plain TRACE START
    /// session. Unrecognised keywords are silently ignored; unrecognised
    /// library/function names resolve to a sentinel that matches nothing,
    /// so the client sees an empty stream rather than an error (S6).
    pub fn parse(filter_buf: &str) -> Self {
        parse_tokens(filter_buf).0
    }

    /// Parse a filter buffer for a TRACE RUN session, where `PROC=` is not
    /// allowed (the run already targets its own child process).
    pub fn parse_for_run(filter_buf: &str) -> Result<Self, FilterError> {
        let (filter, saw_proc) = parse_tokens(filter_buf);
        if saw_proc {
            return Err(FilterError::ProcNotAllowedInRun);
        }
        Ok(filter)
    }

    pub fn matches(
        &self,
        meta: &FunctionMetadata,
        task_name: &str,
        retval: u32,
        return_ready: bool,
    ) -> bool {
        if let Some(lib) = &self.lib {
            match lib {
                Some(l) if *l == meta.lib_id => {}
                _ => return false,
            }
        }
        if let Some(func) = &self.func {
            match func {
                Some(id) if *id == meta.id => {}
                _ => return false,
            }
        }
        if let Some(substring) = &self.task_substring {
            if !strip_cli_prefix(task_name).contains(substring.as_str()) {
                return false;
            }
        }
        if self.errors_only {
            // A call still in flight has no retval to judge yet; the
            // original never shows an in-flight call under ERRORS.
            if !return_ready {
                return false;
            }
            if !is_error(meta, retval) {
                return false;
            }
        }
        true
    }
}

/// Strips a leading `[N] ` CLI-number prefix (as `TaskNameCache` renders
/// names it can't resolve, SPEC_FULL.md §4.6) before substring matching, so
/// `PROC=shell` still matches a task rendered as `[3] shell.1`.
fn strip_cli_prefix(task_name: &str) -> &str {
    let Some(rest) = task_name.strip_prefix('[') else {
        return task_name;
    };
    match rest.find("] ") {
        Some(idx) if rest[..idx].bytes().all(|b| b.is_ascii_digit()) => &rest[idx + 2..],
        _ => task_name,
    }
}

fn parse_lib(name: &str) -> Option<LibId> {
    if name.eq_ignore_ascii_case("exec") {
        Some(LibId::Exec)
    } else if name.eq_ignore_ascii_case("dos") {
        Some(LibId::Dos)
    } else {
        None
    }
}

fn parse_tokens(filter_buf: &str) -> (ClientFilter, bool) {
    let mut filter = ClientFilter::default();
    let mut saw_proc = false;
    for token in filter_buf.split_whitespace() {
        if token.eq_ignore_ascii_case("ERRORS") {
            filter.errors_only = true;
        } else if let Some(rest) = strip_ci_prefix(token, "LIB=") {
            filter.lib = Some(parse_lib(rest));
        } else if let Some(rest) = strip_ci_prefix(token, "FUNC=") {
            filter.func = Some(atrace_proto::lookup_by_name(rest).map(|m| m.id));
        } else if let Some(rest) = strip_ci_prefix(token, "PROC=") {
            filter.task_substring = Some(rest.to_string());
            saw_proc = true;
        }
        // unrecognised keyword: ignored (§4.8).
    }
    (filter, saw_proc)
}

fn strip_ci_prefix<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    if token.len() >= prefix.len() && token.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes()) {
        Some(&token[prefix.len()..])
    } else {
        None
    }
}

/// Whether `retval` indicates failure under `meta`'s error-check
/// convention. Ported from `format_retval`'s companion classification in
/// the original daemon.
pub fn is_error(meta: &FunctionMetadata, retval: u32) -> bool {
    match meta.error_check {
        ErrorCheck::Null => retval == 0,
        ErrorCheck::NZero => retval != 0,
        ErrorCheck::Void => false,
        ErrorCheck::Any => true,
    }
}
