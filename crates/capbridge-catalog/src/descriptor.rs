//! Capability descriptors.
//!
//! Discovery returns lenient [`RawCapability`] entries; each is normalized
//! into a strict [`CapabilityDescriptor`] or dropped with a per-entry
//! [`SchemaError`]. A dropped entry never aborts the discovery pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;

/// HTTP verb a capability is forwarded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl HttpMethod {
    fn parse(raw: &str) -> Result<Self, SchemaError> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            other => Err(SchemaError::UnsupportedMethod(other.to_string())),
        }
    }

    /// The corresponding `reqwest` method.
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

/// One entry as returned by the backend's discovery endpoint. Every field
/// is optional at the wire level; normalization decides what is usable.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCapability {
    /// Unique capability name.
    pub name: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON Schema for the capability's arguments.
    pub input_schema: Option<Value>,
    /// Path on the backend's remote-procedure surface.
    pub endpoint: Option<String>,
    /// HTTP verb; defaults to POST when omitted.
    pub method: Option<String>,
    /// Whether invocations must carry a bearer credential.
    #[serde(default)]
    pub requires_auth: bool,
}

/// A validated, normalized capability.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDescriptor {
    /// Unique key in the catalog.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Schema document the runtime validator is compiled from.
    pub input_schema: Value,
    /// Backend path, relative to the invocation base URL.
    pub endpoint: String,
    /// Forwarding verb.
    pub method: HttpMethod,
    /// Whether invocations must carry a bearer credential.
    pub requires_auth: bool,
}

impl CapabilityDescriptor {
    /// Normalize a raw discovery entry.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] naming the first defect: missing name,
    /// description, schema, or endpoint; a non-object schema; or an
    /// unsupported HTTP verb.
    pub fn from_raw(raw: RawCapability) -> Result<Self, SchemaError> {
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(SchemaError::MissingField("name"))?;
        let description = raw
            .description
            .filter(|d| !d.trim().is_empty())
            .ok_or(SchemaError::MissingField("description"))?;
        let input_schema = raw
            .input_schema
            .ok_or(SchemaError::MissingField("input_schema"))?;
        if !input_schema.is_object() {
            return Err(SchemaError::NotAnObject);
        }
        let endpoint = raw
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .ok_or(SchemaError::MissingField("endpoint"))?;
        let method = match raw.method {
            Some(m) => HttpMethod::parse(&m)?,
            None => HttpMethod::Post,
        };
        Ok(Self {
            name,
            description,
            input_schema,
            endpoint,
            method,
            requires_auth: raw.requires_auth,
        })
    }
}
