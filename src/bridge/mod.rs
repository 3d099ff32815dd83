//! The privileged bridge and the wire types it speaks.

pub mod http;
pub mod message;
pub mod session;
mod service;

pub use http::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody,
    TransportError,
};
pub use message::{
    BridgeFailure, BridgeMessage, BridgeRequest, FailureKind, Payload, UserIdentity, RESPONSE_SUFFIX,
};
pub use service::{Bridge, TOKEN_HEADER};
