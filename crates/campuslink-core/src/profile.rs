use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verified identity data returned by the application's status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub schoolid: String,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    code: Value,
    #[serde(default)]
    data: Option<StatusData>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    name: Option<String>,
    schoolid: Option<Value>,
}

/// The status endpoint reports success as `0`, either as a number or a string
fn is_success_code(code: &Value) -> bool {
    match code {
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s.trim() == "0",
        _ => false,
    }
}

/// School ids come back as strings from some deployments and numbers from others
fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the profile from a status response body.
///
/// `None` when the body is not JSON, the code is non-zero, or the profile
/// fields are missing.
pub fn parse_status(body: &str) -> Option<Profile> {
    let envelope: StatusEnvelope = serde_json::from_str(body).ok()?;
    if !is_success_code(&envelope.code) {
        return None;
    }
    let data = envelope.data?;
    Some(Profile {
        name: data.name?,
        schoolid: value_to_string(data.schoolid?)?,
    })
}
