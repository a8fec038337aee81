use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::InstanceRecord;

/// Request types accepted by the naming service, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NamingRequest {
    Register { name: String, host: String, port: u16 },
    Heartbeat { name: String },
    Lookup,
    Deregister { name: String },
}

const KNOWN_TYPES: [&str; 4] = ["register", "heartbeat", "lookup", "deregister"];

/// Decodes one request payload.
///
/// Text that is not JSON, or a known `type` with missing or ill-typed fields,
/// maps to [`NamingErrorCode::InvalidJson`]. A missing or unrecognised `type`
/// maps to [`NamingErrorCode::UnknownType`].
pub fn decode_request(payload: &[u8]) -> Result<NamingRequest, NamingErrorCode> {
    let raw: serde_json::Value =
        serde_json::from_slice(payload).map_err(|_| NamingErrorCode::InvalidJson)?;

    let known = raw
        .get("type")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|kind| KNOWN_TYPES.contains(&kind));
    if !known {
        return Err(NamingErrorCode::UnknownType);
    }

    serde_json::from_value(raw).map_err(|_| NamingErrorCode::InvalidJson)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Error codes reported in the `error` field of a response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamingErrorCode {
    InvalidJson,
    UnknownType,
    NoServers,
}

impl fmt::Display for NamingErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            NamingErrorCode::InvalidJson => "invalid_json",
            NamingErrorCode::UnknownType => "unknown_type",
            NamingErrorCode::NoServers => "no_servers",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamingResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NamingErrorCode>,
}

impl NamingResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            name: None,
            host: None,
            port: None,
            error: None,
        }
    }

    pub fn error(code: NamingErrorCode) -> Self {
        Self {
            status: ResponseStatus::Error,
            error: Some(code),
            ..Self::ok()
        }
    }

    pub fn endpoint(endpoint: Endpoint) -> Self {
        Self {
            name: Some(endpoint.name),
            host: Some(endpoint.host),
            port: Some(endpoint.port),
            ..Self::ok()
        }
    }

    /// Extracts the endpoint carried by a successful lookup response.
    pub fn into_endpoint(self) -> Option<Endpoint> {
        match (self.status, self.name, self.host, self.port) {
            (ResponseStatus::Ok, Some(name), Some(host), Some(port)) => {
                Some(Endpoint { name, host, port })
            }
            _ => None,
        }
    }
}

/// Network address of a named instance as exchanged on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<InstanceRecord> for Endpoint {
    fn from(record: InstanceRecord) -> Self {
        Self {
            name: record.name,
            host: record.host,
            port: record.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_known_request_type() {
        assert_eq!(
            decode_request(br#"{"type":"register","name":"s1","host":"h","port":9000}"#),
            Ok(NamingRequest::Register {
                name: "s1".into(),
                host: "h".into(),
                port: 9000
            })
        );
        assert_eq!(
            decode_request(br#"{"type":"heartbeat","name":"s1"}"#),
            Ok(NamingRequest::Heartbeat { name: "s1".into() })
        );
        assert_eq!(
            decode_request(br#"{"type":"lookup"}"#),
            Ok(NamingRequest::Lookup)
        );
        assert_eq!(
            decode_request(br#"{"type":"deregister","name":"s1"}"#),
            Ok(NamingRequest::Deregister { name: "s1".into() })
        );
    }

    #[test]
    fn classifies_malformed_payloads() {
        assert_eq!(
            decode_request(b"not json"),
            Err(NamingErrorCode::InvalidJson)
        );
        assert_eq!(
            decode_request(br#"{"type":"register","name":"s1"}"#),
            Err(NamingErrorCode::InvalidJson)
        );
        assert_eq!(
            decode_request(br#"{"type":"explode"}"#),
            Err(NamingErrorCode::UnknownType)
        );
        assert_eq!(
            decode_request(br#"{"name":"s1"}"#),
            Err(NamingErrorCode::UnknownType)
        );
    }

    #[test]
    fn responses_omit_absent_fields() {
        let ok = serde_json::to_string(&NamingResponse::ok()).unwrap();
        assert_eq!(ok, r#"{"status":"ok"}"#);

        let err = serde_json::to_string(&NamingResponse::error(NamingErrorCode::NoServers)).unwrap();
        assert_eq!(err, r#"{"status":"error","error":"no_servers"}"#);

        let found =
            serde_json::to_string(&NamingResponse::endpoint(Endpoint::new("s1", "h", 9000)))
                .unwrap();
        assert_eq!(found, r#"{"status":"ok","name":"s1","host":"h","port":9000}"#);
    }
}
