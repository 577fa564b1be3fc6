//! Postman collection export
//!
//! Turns captured records into a Postman collection (schema v2.1) so they
//! can be imported into API clients. Export is a pure transformation: it
//! neither mutates nor persists anything.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::record::CallRecord;

/// Schema reference written into every exported collection
pub const POSTMAN_SCHEMA_V21: &str =
    "https://schema.getpostman.com/json/collection/v2.1.0/collection.json";

/// Exported collection document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub info: CollectionInfo,
    pub item: Vec<CollectionItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    #[serde(rename = "_postman_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "schema")]
    pub schema_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub name: String,
    pub request: ItemRequest,
    /// Always empty; responses are not exported
    pub response: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub method: String,
    pub header: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RawBody>,
    pub url: ItemUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBody {
    pub mode: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUrl {
    pub raw: String,
    pub host: Vec<String>,
    pub path: Vec<String>,
}

impl ItemUrl {
    /// Split on `/`: the third piece is the authority, the rest the path.
    ///
    /// `https://api.example.com/v1/users` gives host `["api.example.com"]`
    /// and path `["v1", "users"]`. Empty segments are kept, so a trailing
    /// slash ends the path with `""`. Query strings stay attached to the
    /// last path segment.
    pub fn parse(url: &str) -> Self {
        let parts: Vec<&str> = url.split('/').collect();
        let host = parts
            .get(2)
            .map(|h| vec![h.to_string()])
            .unwrap_or_default();
        let path = parts
            .iter()
            .skip(3)
            .map(|segment| segment.to_string())
            .collect();

        Self {
            raw: url.to_string(),
            host,
            path,
        }
    }
}

impl Collection {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build a collection named `name` with one item per record, in order
pub fn export_collection(records: &[CallRecord], name: &str) -> Collection {
    Collection {
        info: CollectionInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            schema_ref: POSTMAN_SCHEMA_V21.to_string(),
        },
        item: records.iter().map(export_item).collect(),
    }
}

fn export_item(record: &CallRecord) -> CollectionItem {
    let header = record
        .request_headers
        .iter()
        .flatten()
        .map(|h| KeyValue {
            key: h.name.clone(),
            value: h.value.clone(),
        })
        .collect();

    let body = record.request_body.as_ref().map(|body| RawBody {
        mode: "raw".to_string(),
        raw: body.as_text(),
    });

    CollectionItem {
        name: record.url.clone(),
        request: ItemRequest {
            method: record.method.clone(),
            header,
            body,
            url: ItemUrl::parse(&record.url),
        },
        response: Vec::new(),
    }
}
