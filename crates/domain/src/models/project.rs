//! Project definitions: endpoint metadata and request/response templates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Protocol type of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectType {
    Rest,
    Soap,
}

impl ProjectType {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "REST",
            Self::Soap => "SOAP",
        }
    }
}

impl std::str::FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REST" => Ok(Self::Rest),
            "SOAP" => Ok(Self::Soap),
            other => Err(format!("Unknown project type: {}", other)),
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One callable endpoint within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMeta {
    pub name: String,
    pub method: String,
    pub path: String,
    /// SOAPAction header value, for SOAP projects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soap_action: Option<String>,
}

/// Auth descriptor for token acquisition against an identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDescriptor {
    pub token_url: String,
    #[serde(default)]
    pub audience: Option<String>,
    /// Header the token is injected into.
    #[serde(default = "default_header_key")]
    pub header_key: String,
    /// Attribute holding the token in a structured token response.
    #[serde(default = "default_token_attribute")]
    pub token_attribute: String,
    /// Body posted to the token endpoint.
    pub payload: Value,
}

fn default_header_key() -> String {
    "Authorization".to_string()
}

fn default_token_attribute() -> String {
    "access_token".to_string()
}

/// Parsed project metadata (the `meta` JSON column).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub base_url: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointMeta>,
    /// Default headers applied to every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Default query parameters applied to every request.
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
}

impl ProjectMeta {
    /// Look up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<&EndpointMeta> {
        self.endpoints.iter().find(|e| e.name == name)
    }
}

/// A stored project definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub project_type: ProjectType,
    pub meta: ProjectMeta,
    /// Example request body; its shape drives header derivation and coercion.
    pub request_template: Value,
    /// Example response body; drives EXPECTED_ columns.
    pub response_template: Value,
    pub owner: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_type_roundtrip() {
        assert_eq!(ProjectType::Rest.as_str(), "REST");
        assert_eq!(ProjectType::Soap.as_str(), "SOAP");
        assert_eq!("REST".parse::<ProjectType>().unwrap(), ProjectType::Rest);
        assert!("GRPC".parse::<ProjectType>().is_err());
    }

    #[test]
    fn test_project_meta_deserialize_defaults() {
        let meta: ProjectMeta = serde_json::from_value(json!({
            "baseUrl": "https://api.example.com"
        }))
        .unwrap();
        assert!(meta.endpoints.is_empty());
        assert!(meta.headers.is_empty());
        assert!(meta.auth.is_none());
    }

    #[test]
    fn test_auth_descriptor_defaults() {
        let auth: AuthDescriptor = serde_json::from_value(json!({
            "tokenUrl": "https://idp.example.com/token",
            "payload": {"grant_type": "client_credentials"}
        }))
        .unwrap();
        assert_eq!(auth.header_key, "Authorization");
        assert_eq!(auth.token_attribute, "access_token");
        assert!(auth.audience.is_none());
    }

    #[test]
    fn test_endpoint_lookup() {
        let meta: ProjectMeta = serde_json::from_value(json!({
            "baseUrl": "https://api.example.com",
            "endpoints": [
                {"name": "createOrder", "method": "POST", "path": "/orders"},
                {"name": "getOrder", "method": "GET", "path": "/orders/{{orderId}}"}
            ]
        }))
        .unwrap();
        assert_eq!(meta.endpoint("getOrder").unwrap().method, "GET");
        assert!(meta.endpoint("missing").is_none());
    }
}
