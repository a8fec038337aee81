use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{TxnId, Value};

/// Caller-chosen correlation id. Any JSON value is accepted and echoed back
/// unchanged; [`crate::DictionaryClient`] and [`crate::Coordinator`] use integers.
pub type RequestId = serde_json::Value;

/// Operations understood by the dictionary manager. Parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Begin,
    Lookup,
    Insert,
    Update,
    Delete,
    Prepare,
    Commit,
    Rollback,
    Shutdown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Begin => "BEGIN",
            Operation::Lookup => "LOOKUP",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Prepare => "PREPARE",
            Operation::Commit => "COMMIT",
            Operation::Rollback => "ROLLBACK",
            Operation::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedOperation(pub String);

impl FromStr for Operation {
    type Err = UnsupportedOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.to_ascii_uppercase().as_str() {
            "BEGIN" => Operation::Begin,
            "LOOKUP" => Operation::Lookup,
            "INSERT" => Operation::Insert,
            "UPDATE" => Operation::Update,
            "DELETE" => Operation::Delete,
            "PREPARE" => Operation::Prepare,
            "COMMIT" => Operation::Commit,
            "ROLLBACK" => Operation::Rollback,
            "SHUTDOWN" => Operation::Shutdown,
            other => return Err(UnsupportedOperation(other.to_string())),
        };
        Ok(op)
    }
}

/// `{id, op, txid?, key?, value?}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DictRequest {
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Operation name as sent on the wire; see [`Operation`].
    #[serde(default)]
    pub op: String,
    /// Opaque on the wire; ids this instance never issued name no transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl DictRequest {
    pub fn new(id: impl Into<RequestId>, op: Operation) -> Self {
        Self {
            id: Some(id.into()),
            op: op.as_str().to_string(),
            txid: None,
            key: None,
            value: None,
        }
    }

    pub fn with_txid(mut self, txid: Option<TxnId>) -> Self {
        self.txid = txid.map(|txid| txid.to_string());
        self
    }

    /// Sets the wire txid verbatim, whether or not it is a valid [`TxnId`].
    pub fn with_raw_txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    /// The txid parsed as one this instance could have issued. Text that does
    /// not parse names no transaction and yields `None`.
    pub fn parsed_txid(&self) -> Option<TxnId> {
        self.txid.as_deref().and_then(|raw| raw.parse().ok())
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    NotFound,
    Retry,
    Error,
}

/// `{id, status, value?, txid?}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DictResponse {
    pub id: Option<RequestId>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<TxnId>,
}

impl DictResponse {
    pub fn new(id: Option<RequestId>, status: Status) -> Self {
        Self {
            id,
            status,
            value: None,
            txid: None,
        }
    }

    pub fn ok(id: Option<RequestId>) -> Self {
        Self::new(id, Status::Ok)
    }

    pub fn error(id: Option<RequestId>, description: impl Into<String>) -> Self {
        Self::new(id, Status::Error).with_value(description)
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_txid(mut self, txid: TxnId) -> Self {
        self.txid = Some(txid);
        self
    }
}

/// Decodes one wire line, answering undecodable input with an `error`
/// response that echoes the request id when one can be recovered.
pub fn decode_request(line: &str) -> Result<DictRequest, DictResponse> {
    let raw: serde_json::Value = serde_json::from_str(line)
        .map_err(|err| DictResponse::error(None, format!("invalid request: {err}")))?;
    let id = raw.get("id").filter(|id| !id.is_null()).cloned();
    serde_json::from_value(raw)
        .map_err(|err| DictResponse::error(id, format!("invalid request: {err}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn operations_parse_case_insensitively() {
        assert_eq!("begin".parse::<Operation>(), Ok(Operation::Begin));
        assert_eq!("RollBack".parse::<Operation>(), Ok(Operation::Rollback));
        assert_eq!(
            "merge".parse::<Operation>(),
            Err(UnsupportedOperation("MERGE".into()))
        );
    }

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        let resp = DictResponse::new(Some(7.into()), Status::NotFound);
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"id":7,"status":"not_found"}"#
        );
    }

    #[test]
    fn decode_recovers_id_from_ill_typed_request() {
        let err = decode_request(r#"{"id": 4, "op": "LOOKUP", "key": 17}"#).unwrap_err();
        assert_eq!(err.id, Some(json!(4)));
        assert_eq!(err.status, Status::Error);

        let err = decode_request("{{").unwrap_err();
        assert_eq!(err.id, None);
    }

    #[test]
    fn decode_accepts_minimal_request() {
        let req = decode_request(r#"{"id": 1, "op": "begin"}"#).unwrap();
        assert_eq!(req.op, "begin");
        assert!(req.txid.is_none() && req.key.is_none() && req.value.is_none());
    }

    #[test]
    fn string_ids_are_echoed_verbatim() {
        let req = decode_request(r#"{"id": "abc", "op": "BEGIN"}"#).unwrap();
        assert_eq!(req.id, Some(json!("abc")));

        let err = decode_request(r#"{"id": {"n": 1}, "op": 5}"#).unwrap_err();
        assert_eq!(err.id, Some(json!({"n": 1})));
    }

    #[test]
    fn txid_is_opaque_text_on_the_wire() {
        let req = decode_request(r#"{"id": 1, "op": "COMMIT", "txid": "deadbeef"}"#).unwrap();
        assert_eq!(req.txid.as_deref(), Some("deadbeef"));
        assert_eq!(req.parsed_txid(), None);

        let txid = TxnId::new();
        let req = DictRequest::new(2, Operation::Prepare).with_txid(Some(txid));
        assert_eq!(req.parsed_txid(), Some(txid));
    }
}
