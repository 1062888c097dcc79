//! Line-delimited JSON protocol for `deckwarden serve`.
//!
//! # Protocol Overview
//!
//! Each line on stdin is one request; each line on stdout is one message.
//!
//! ## Client → Server ([`RpcRequest`])
//!
//! ```json
//! {"id": 1, "method": "unlock", "params": {"masterPassword": "..."}}
//! ```
//!
//! ## Server → Client ([`ServerMessage`])
//! - `ready`: sent once after the backend has probed the initial phase
//! - `result`: the envelope for one request, correlated by `id`
//! - `phase`: session snapshot after every session operation

use crate::backend::Request;
use crate::envelope::ResultEnvelope;
use crate::session::{Phase, PhaseEvent};
use crate::vault::Operation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    /// Client-chosen correlation id, echoed back verbatim.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Messages written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready {
        version: String,
        phase: Phase,
        #[serde(rename = "userEmail")]
        user_email: Option<String>,
    },
    Result {
        id: Value,
        #[serde(flatten)]
        envelope: ResultEnvelope<Value>,
    },
    Phase(PhaseEvent),
}

// No Debug on parameter structs: they carry secrets.

#[derive(Deserialize)]
struct LoginParams {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct Login2faParams {
    email: String,
    password: String,
    method: u8,
    code: String,
}

#[derive(Deserialize)]
struct UnlockParams {
    #[serde(alias = "masterPassword")]
    master_password: String,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default, alias = "loginsOnly")]
    logins_only: bool,
}

#[derive(Deserialize)]
struct ItemParams {
    #[serde(alias = "item_id", alias = "itemId")]
    id: String,
}

#[derive(Deserialize)]
struct CopyParams {
    text: String,
}

fn params<T: DeserializeOwned>(operation: Operation, params: Value) -> Result<T, String> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| format!("invalid params for {}: {}", operation, e))
}

impl RpcRequest {
    /// Resolve the method name and typed parameters.
    pub fn into_request(self) -> Result<Request, String> {
        let operation = Operation::parse(&self.method)
            .ok_or_else(|| format!("unknown method: {}", self.method))?;
        let request = match operation {
            Operation::CheckFlatpak => Request::CheckFlatpak,
            Operation::CheckBitwarden => Request::CheckBitwarden,
            Operation::Status => Request::Status,
            Operation::Login => {
                let p: LoginParams = params(operation, self.params)?;
                Request::Login {
                    email: p.email,
                    password: p.password,
                }
            }
            Operation::Login2fa => {
                let p: Login2faParams = params(operation, self.params)?;
                Request::Login2fa {
                    email: p.email,
                    password: p.password,
                    method: p.method,
                    code: p.code,
                }
            }
            Operation::Unlock => {
                let p: UnlockParams = params(operation, self.params)?;
                Request::Unlock {
                    master_password: p.master_password,
                }
            }
            Operation::Lock => Request::Lock,
            Operation::Logout => Request::Logout,
            Operation::ListItems => {
                let p: ListParams = params(operation, self.params)?;
                Request::ListItems {
                    logins_only: p.logins_only,
                }
            }
            Operation::GetItem => {
                let p: ItemParams = params(operation, self.params)?;
                Request::GetItem { id: p.id }
            }
            Operation::GetTotp => {
                let p: ItemParams = params(operation, self.params)?;
                Request::GetTotp { id: p.id }
            }
            Operation::CopyToClipboard => {
                let p: CopyParams = params(operation, self.params)?;
                Request::CopyToClipboard { text: p.text }
            }
        };
        Ok(request)
    }
}
