//! Discovery of session state from what the page exposes.
//!
//! All of this is pattern matching over page text; it finds the common
//! shapes and misses anything the instance renders differently.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::message::UserIdentity;
use crate::page::PageEnvironment;

/// Page global holding the anti-forgery session token.
pub const TOKEN_GLOBAL: &str = "g_ck";

/// Page globals that may hold the current user, in priority order.
const USER_GLOBALS: &[&str] = &["NOW.user", "g_user"];

const ID_FIELDS: &[&str] = &["id", "sys_id", "userID", "user_sys_id"];
const USERNAME_FIELDS: &[&str] = &["username", "user_name", "userName"];

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"g_ck\s*=\s*['"]([^'"]+)['"]"#).expect("token pattern is valid")
});

static IMPERSONATOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:impersonator|impersonating_user|original_user)['"]?\s*[:=]\s*['"]([^'"\s]+)['"]"#,
    )
    .expect("impersonator pattern is valid")
});

/// Find the session token: page global first, then inline script content,
/// then the named cookie.
pub fn discover_session_token(env: &dyn PageEnvironment, token_cookie: &str) -> Option<String> {
    if let Some(token) = env
        .global(TOKEN_GLOBAL)
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|t| !t.is_empty())
    {
        return Some(token);
    }

    if let Some(token) = env
        .inline_scripts()
        .iter()
        .find_map(|script| TOKEN_PATTERN.captures(script))
        .map(|caps| caps[1].to_string())
    {
        return Some(token);
    }

    env.cookie(token_cookie).filter(|t| !t.is_empty())
}

/// Find the original user behind an impersonated session in arbitrary page
/// text (inline script, document markup, or an error page).
pub fn find_impersonator(text: &str) -> Option<String> {
    IMPERSONATOR_PATTERN
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Look for the impersonation marker in what the page already has loaded.
pub fn impersonator_from_page(env: &dyn PageEnvironment) -> Option<String> {
    env.inline_scripts()
        .iter()
        .find_map(|script| find_impersonator(script))
        .or_else(|| env.document_html().and_then(|html| find_impersonator(&html)))
}

/// Current user from page globals, if any of them carries an id.
pub fn current_user_from_globals(env: &dyn PageEnvironment) -> Option<UserIdentity> {
    USER_GLOBALS
        .iter()
        .filter_map(|name| env.global(name))
        .find_map(|value| normalize_user(&value))
}

/// Normalize a user object from any of the shapes the instance uses.
///
/// REST payloads wrap the object in `result`; that wrapper is unwrapped
/// first. Returns `None` when no id can be found.
pub fn normalize_user(value: &Value) -> Option<UserIdentity> {
    let value = value.get("result").unwrap_or(value);

    let id = first_string(value, ID_FIELDS)?;
    let username = first_string(value, USERNAME_FIELDS).unwrap_or_default();

    Some(UserIdentity { id, username })
}

fn first_string(value: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| value.get(field))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
