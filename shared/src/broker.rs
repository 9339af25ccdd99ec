use serde::{Deserialize, Serialize};

/// Local file header signature of a zip archive (`PK\x03\x04`).
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerRequest {
    pub map_id: String,
}

/// Payload returned by the map broker. Any subset of the success fields may be
/// present; the client tries them in the order they are declared here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerResponse {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_data: Option<serde_json::Value>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mvf_base64: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdoor_view_token: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrokerResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn has_payload(&self) -> bool {
        self.map_data.as_ref().is_some_and(|data| !data.is_null())
            || self.mvf_base64.as_deref().is_some_and(|b64| !b64.is_empty())
            || self.token().is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.outdoor_view_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

/// Map client configuration served to the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub map_id: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<MapCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCredentials {
    pub key: String,
    pub secret: String,
}

/// Zip detection by magic number, falling back to the declared content type.
pub fn is_zip_archive(bytes: &[u8], content_type: Option<&str>) -> bool {
    if bytes.starts_with(&ZIP_MAGIC) {
        return true;
    }
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("zip"))
}
