//! Captured call records
//!
//! A [`CallRecord`] is created once per observed request and then only
//! ever gains its late-bound fields (request headers, response status and
//! headers). JSON field names follow the browser's capture format so a
//! persisted log stays readable by other tooling.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::source::RequestBodyDetails;

/// Sentinel stored in place of a request body that is not valid text
///
/// The persisted form does not distinguish it from a text body with the
/// same contents, so such a body reads back as [`RequestBody::Binary`].
pub const BINARY_BODY_SENTINEL: &str = "(binary data)";

/// A single header name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Decoded request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BodyRepr", into = "BodyRepr")]
pub enum RequestBody {
    /// Raw bytes that decoded as UTF-8
    Text(String),
    /// Structured form fields (name → values)
    Form(BTreeMap<String, Vec<String>>),
    /// Raw bytes that could not be decoded
    Binary,
}

impl RequestBody {
    /// Decode the body carried by a start event.
    ///
    /// Raw payloads take precedence over form data. Only the first raw
    /// chunk is considered; a chunk without inline bytes (a file upload)
    /// counts as binary.
    pub fn decode(details: Option<&RequestBodyDetails>) -> Option<Self> {
        let details = details?;

        if let Some(raw) = &details.raw {
            let bytes = raw.first().and_then(|chunk| chunk.bytes.as_ref());
            return Some(match bytes.map(|b| std::str::from_utf8(b)) {
                Some(Ok(text)) => RequestBody::Text(text.to_string()),
                _ => RequestBody::Binary,
            });
        }

        details.form_data.clone().map(RequestBody::Form)
    }

    /// Body rendered as plain text (form data as JSON)
    pub fn as_text(&self) -> String {
        match self {
            RequestBody::Text(text) => text.clone(),
            RequestBody::Form(fields) => serde_json::to_string(fields).unwrap_or_default(),
            RequestBody::Binary => BINARY_BODY_SENTINEL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BodyRepr {
    Text(String),
    Form(BTreeMap<String, Vec<String>>),
}

impl From<BodyRepr> for RequestBody {
    fn from(repr: BodyRepr) -> Self {
        match repr {
            BodyRepr::Text(text) if text == BINARY_BODY_SENTINEL => RequestBody::Binary,
            BodyRepr::Text(text) => RequestBody::Text(text),
            BodyRepr::Form(fields) => RequestBody::Form(fields),
        }
    }
}

impl From<RequestBody> for BodyRepr {
    fn from(body: RequestBody) -> Self {
        match body {
            RequestBody::Text(text) => BodyRepr::Text(text),
            RequestBody::Form(fields) => BodyRepr::Form(fields),
            RequestBody::Binary => BodyRepr::Text(BINARY_BODY_SENTINEL.to_string()),
        }
    }
}

/// One observed request and whatever has been learned about it so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(rename = "timeStamp")]
    pub timestamp: String,
    pub request_body: Option<RequestBody>,
    pub request_headers: Option<Vec<HttpHeader>>,
    pub response_headers: Option<Vec<HttpHeader>>,
    pub status_code: Option<u16>,
    /// Folder tag, derived from the folder index for presentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<String>,
}

impl CallRecord {
    /// Create a record with all late-bound fields absent
    pub fn new(
        request_id: impl Into<String>,
        url: impl Into<String>,
        method: impl Into<String>,
        timestamp: impl Into<String>,
        request_body: Option<RequestBody>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            method: method.into(),
            timestamp: timestamp.into(),
            request_body,
            request_headers: None,
            response_headers: None,
            status_code: None,
            moved_to: None,
        }
    }

    /// Record the headers sent with the request.
    ///
    /// Returns `false` without touching the record if headers were
    /// already set.
    pub fn set_request_headers(&mut self, headers: Option<Vec<HttpHeader>>) -> bool {
        if self.request_headers.is_some() {
            return false;
        }
        self.request_headers = Some(headers.unwrap_or_default());
        true
    }

    /// Record the response status and headers.
    ///
    /// Returns `false` without touching the record if the response was
    /// already recorded.
    pub fn set_response(&mut self, status_code: u16, headers: Option<Vec<HttpHeader>>) -> bool {
        if self.status_code.is_some() || self.response_headers.is_some() {
            return false;
        }
        self.status_code = Some(status_code);
        self.response_headers = Some(headers.unwrap_or_default());
        true
    }

    pub fn is_complete(&self) -> bool {
        self.status_code.is_some()
    }
}

/// Format an epoch-milliseconds time stamp as a local display string
pub fn format_timestamp(epoch_millis: f64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(epoch_millis as i64) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string(),
        None => epoch_millis.to_string(),
    }
}
