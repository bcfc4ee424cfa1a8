//! On-disk format of request and response artifacts.
//!
//! ```text
//! {key}.req    line 1: method
//!              line 2: path
//!              rest:   body, verbatim
//!
//! {key}.resp   line 1: decimal status code
//!              rest:   body, verbatim
//! ```

use std::path::{Path, PathBuf};

use crate::types::BrokerResponse;

pub const REQUEST_EXT: &str = "req";
pub const RESPONSE_EXT: &str = "resp";
pub const TEMP_EXT: &str = "tmp";

/// Status returned when a response file has no usable status line.
pub const INVALID_STATUS: i32 = 500;

pub fn request_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.{REQUEST_EXT}"))
}

pub fn response_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.{RESPONSE_EXT}"))
}

/// A unique scratch file for staging content before it is published.
pub fn temp_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.{}.{TEMP_EXT}", uuid::Uuid::new_v4().simple()))
}

/// The key of an artifact path, if it has the given extension.
pub fn key_of(path: &Path, ext: &str) -> Option<String> {
    if path.extension()?.to_str()? != ext {
        return None;
    }
    Some(path.file_stem()?.to_str()?.to_string())
}

/// A parsed request artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

pub fn format_request(method: &str, path: &str, body: &str) -> String {
    format!("{method}\n{path}\n{body}")
}

/// Parse a request artifact. `None` when the method or path line is missing.
pub fn parse_request(content: &str) -> Option<StagedRequest> {
    let (method, rest) = content.split_once('\n')?;
    if rest.is_empty() {
        return None;
    }
    let (path, body) = rest.split_once('\n').unwrap_or((rest, ""));
    Some(StagedRequest {
        method: trim_cr(method).to_string(),
        path: trim_cr(path).to_string(),
        body: body.to_string(),
    })
}

pub fn format_response(status_code: i32, body: &str) -> String {
    format!("{status_code}\n{body}")
}

/// Parse a response artifact. A missing or non-numeric status line yields a
/// 500 instead of an error.
pub fn parse_response(content: &str) -> BrokerResponse {
    let (status, body) = content.split_once('\n').unwrap_or((content, ""));
    match trim_cr(status).trim().parse::<i32>() {
        Ok(code) => BrokerResponse::new(code, body),
        Err(_) => BrokerResponse::new(INVALID_STATUS, "Invalid status code"),
    }
}

fn trim_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}
