//! Classification of platform RPC failures into core error kinds.
//!
//! Invocation errors are matched on their RPC code and name. Errors that only
//! reach us rendered (login-code requests, connection setup) are parsed from the
//! `rpc error <code>: <NAME> ... (value: <n>)` text grammers prints.

use std::sync::OnceLock;

use grammers_client::InvocationError;
use regex::Regex;
use tgf_core::errors::Error;

fn rpc_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"rpc error (-?\d+): ([A-Z0-9_]+)(?:.*\(value: (\d+)\))?").ok())
        .as_ref()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RpcFailure {
    pub code: i32,
    pub name: String,
    pub value: Option<u32>,
}

pub(crate) fn parse_rpc(rendered: &str) -> Option<RpcFailure> {
    let caps = rpc_pattern()?.captures(rendered)?;
    Some(RpcFailure {
        code: caps.get(1)?.as_str().parse().ok()?,
        name: caps.get(2)?.as_str().to_string(),
        value: caps.get(3).and_then(|m| m.as_str().parse().ok()),
    })
}

pub(crate) fn classify_invocation(err: &InvocationError) -> Error {
    match err {
        InvocationError::Rpc(rpc) => classify_rpc(&RpcFailure {
            code: rpc.code,
            name: rpc.name.clone(),
            value: rpc.value,
        }),
        other => classify(&other.to_string()),
    }
}

/// Map a rendered client error to the core taxonomy. Text without an RPC error
/// in it is a transport failure.
pub(crate) fn classify(rendered: &str) -> Error {
    match parse_rpc(rendered) {
        Some(rpc) => classify_rpc(&rpc),
        None => Error::NetworkTransient(rendered.to_string()),
    }
}

fn classify_rpc(rpc: &RpcFailure) -> Error {
    match rpc.name.as_str() {
        "PHONE_NUMBER_INVALID" | "PHONE_NUMBER_BANNED" | "PHONE_NUMBER_UNOCCUPIED" => {
            Error::InputRejected("Telegram rejected that phone number".to_string())
        }
        "PHONE_NUMBER_FLOOD" => {
            Error::InputRejected("too many login attempts for this number".to_string())
        }
        "PHONE_CODE_INVALID" | "PHONE_CODE_EMPTY" => {
            Error::ChallengeFailed("invalid code".to_string())
        }
        "PHONE_CODE_EXPIRED" => Error::ChallengeFailed("the code has expired".to_string()),
        "PASSWORD_HASH_INVALID" => Error::ChallengeFailed("wrong password".to_string()),

        "AUTH_KEY_UNREGISTERED" | "AUTH_KEY_INVALID" | "SESSION_REVOKED" | "SESSION_EXPIRED"
        | "USER_DEACTIVATED" | "USER_DEACTIVATED_BAN" => Error::NotAuthenticated,

        "CHANNEL_PRIVATE" | "CHANNEL_INVALID" | "CHAT_ID_INVALID" | "PEER_ID_INVALID"
        | "MSG_ID_INVALID" | "USERNAME_INVALID" | "USERNAME_NOT_OCCUPIED" | "CHAT_FORBIDDEN" => {
            Error::NotFoundOrForbidden
        }

        "FLOOD_WAIT" => Error::NetworkTransient(format!(
            "rate limited by Telegram for {}s",
            rpc.value.unwrap_or(0)
        )),
        _ if rpc.code >= 500 || rpc.code == -503 => {
            Error::NetworkTransient(format!("{} ({})", rpc.name, rpc.code))
        }
        _ => Error::External(format!("{} ({})", rpc.name, rpc.code)),
    }
}
