//! Wire types exchanged between the bridge and its clients.
//!
//! Requests and responses share one tagged enum so every message carries a
//! `type` string. Response types all end in [`RESPONSE_SUFFIX`]; the bridge
//! only answers requests and a client only routes responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::http::HttpMethod;
use crate::error::PaletteError;

/// Suffix carried by every response message type.
pub const RESPONSE_SUFFIX: &str = "-response";

/// A request queued for the bridge, carrying the channel its reply goes
/// back on.
#[derive(Debug)]
pub struct BridgeRequest {
    pub message: BridgeMessage,
    pub reply_to: mpsc::UnboundedSender<BridgeMessage>,
}

impl BridgeRequest {
    /// Answer with the request's correlation id. Returns false when the
    /// client is gone.
    pub fn reply(&self, payload: Payload) -> bool {
        self.reply_to
            .send(BridgeMessage {
                correlation_id: self.message.correlation_id.clone(),
                payload,
            })
            .is_ok()
    }
}

/// A correlated request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub correlation_id: String,
    #[serde(flatten)]
    pub payload: Payload,
}

/// A user normalized from whichever source the bridge found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Payload {
    LookupUser {
        username: String,
        instance_url: String,
    },
    LookupUserResponse {
        #[serde(default)]
        user: Option<Value>,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
    Impersonate {
        username: String,
        instance_url: String,
    },
    ImpersonateResponse {
        success: bool,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
    EndImpersonate {
        instance_url: String,
    },
    EndImpersonateResponse {
        success: bool,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
    CurrentUser {
        instance_url: String,
    },
    CurrentUserResponse {
        #[serde(default)]
        user: Option<UserIdentity>,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
    GenericRequest {
        method: HttpMethod,
        url: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    GenericResponse {
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
    RunScript {
        script: String,
        #[serde(default)]
        scope: Option<String>,
    },
    RunScriptResponse {
        #[serde(default)]
        html: Option<String>,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
    RetrieveRemoteSources {
        source_id: String,
    },
    RetrieveSourcesResponse {
        #[serde(default)]
        tracker_id: Option<String>,
        #[serde(default)]
        raw: Option<String>,
        #[serde(default)]
        error: Option<BridgeFailure>,
    },
}

impl Payload {
    /// The `type` tag this payload serializes with.
    pub fn message_type(&self) -> &'static str {
        match self {
            Payload::LookupUser { .. } => "lookup-user",
            Payload::LookupUserResponse { .. } => "lookup-user-response",
            Payload::Impersonate { .. } => "impersonate",
            Payload::ImpersonateResponse { .. } => "impersonate-response",
            Payload::EndImpersonate { .. } => "end-impersonate",
            Payload::EndImpersonateResponse { .. } => "end-impersonate-response",
            Payload::CurrentUser { .. } => "current-user",
            Payload::CurrentUserResponse { .. } => "current-user-response",
            Payload::GenericRequest { .. } => "generic-request",
            Payload::GenericResponse { .. } => "generic-response",
            Payload::RunScript { .. } => "run-script",
            Payload::RunScriptResponse { .. } => "run-script-response",
            Payload::RetrieveRemoteSources { .. } => "retrieve-remote-sources",
            Payload::RetrieveSourcesResponse { .. } => "retrieve-sources-response",
        }
    }

    pub fn is_response(&self) -> bool {
        self.message_type().ends_with(RESPONSE_SUFFIX)
    }
}

/// Category of a bridge-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    Network,
    Authentication,
    Http,
    NoSessionToken,
    Malformed,
    NotImpersonating,
}

/// A failure reported by the bridge as data rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
}

impl BridgeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }

    pub fn no_session_token() -> Self {
        Self::new(
            FailureKind::NoSessionToken,
            PaletteError::NoSessionToken.to_string(),
        )
    }

    pub fn not_impersonating() -> Self {
        Self::new(
            FailureKind::NotImpersonating,
            PaletteError::NotImpersonating.to_string(),
        )
    }

    /// Classify a non-2xx response; 401 and 403 are authentication failures.
    pub fn from_status(status: u16, reason: &str) -> Self {
        let kind = match status {
            401 | 403 => FailureKind::Authentication,
            _ => FailureKind::Http,
        };
        let message = format!("API returned: {} {}", status, reason);
        Self {
            kind,
            message: message.trim_end().to_string(),
            status: Some(status),
        }
    }
}

impl From<BridgeFailure> for PaletteError {
    fn from(failure: BridgeFailure) -> Self {
        match failure.kind {
            FailureKind::Timeout => PaletteError::BridgeTimeout(failure.message),
            FailureKind::Network => PaletteError::BridgeNetwork(failure.message),
            FailureKind::Authentication => PaletteError::AuthenticationRequired(failure.message),
            FailureKind::Http => PaletteError::Http {
                status: failure.status.unwrap_or_default(),
                message: failure.message,
            },
            FailureKind::NoSessionToken => PaletteError::NoSessionToken,
            FailureKind::Malformed => PaletteError::MalformedResponse(failure.message),
            FailureKind::NotImpersonating => PaletteError::NotImpersonating,
        }
    }
}
