//! C-ABI wrapper around `rets-core`.
//!
//! # Overview
//! Exposes a logged-in RETS session through `extern "C"` functions: connect,
//! search with row-at-a-time fetching, object retrieval and query
//! preparation. Callers in any language with a C FFI drive the same
//! `RetsClient` the Rust API uses.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Fallible calls return a single `FfiRetsResult` envelope with
//!   `FfiDataTag` + `void* data`; the error code mirrors `RetsError`.
//! - Rows cross the boundary as JSON objects (column name to value), which
//!   keeps the C surface fixed while column sets vary per search.
//! - The caller owns all returned pointers and must release them with the
//!   matching `rets_free_*` function or `rets_client_free`. A client taken out of
//!   a `Client` result is freed with `rets_client_free`, not with the result.

pub mod types;

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rets_core::{Credentials, ObjectRequest, Options, RetsClient, SearchRequest};
use serde_json::{Map, Value};

use types::*;

/// Borrow a C string argument. `None` for null or non-UTF-8 input.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Parse a JSON object into `(name, value)` pairs, keeping key order.
/// Non-string values are rendered as JSON (`5` stays `5`).
fn json_pairs(json: &str) -> Option<Vec<(String, String)>> {
    let map: Map<String, Value> = serde_json::from_str(json).ok()?;
    let pairs = map
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect();
    Some(pairs)
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Log in to `login_url` and return a `Client` result.
///
/// `ua_password` and `options_json` may be null. `options_json` is a JSON
/// object of option names to values, e.g. `{"offset_support": true}`.
/// On success `data` is a `FfiRetsClient*` that the caller owns and must
/// release with `rets_client_free`; the envelope itself is released with
/// `rets_free_envelope`.
#[unsafe(no_mangle)]
pub extern "C" fn rets_client_connect(
    login_url: *const c_char,
    username: *const c_char,
    password: *const c_char,
    ua_password: *const c_char,
    options_json: *const c_char,
) -> *mut FfiRetsResult {
    catch_unwind(|| {
        let Some(login_url) = (unsafe { str_arg(login_url) }) else {
            return FfiRetsResult::null_arg("login_url");
        };
        let Some(username) = (unsafe { str_arg(username) }) else {
            return FfiRetsResult::null_arg("username");
        };
        let Some(password) = (unsafe { str_arg(password) }) else {
            return FfiRetsResult::null_arg("password");
        };

        let mut credentials = Credentials::new(username, password);
        if let Some(ua) = unsafe { str_arg(ua_password) } {
            credentials = credentials.with_ua_password(ua);
        }

        let options = match unsafe { str_arg(options_json) } {
            Some(json) => match Options::from_json(json) {
                Ok(o) => o,
                Err(e) => return FfiRetsResult::from_error(e),
            },
            None => Options::default(),
        };

        match RetsClient::connect(login_url, &credentials, options) {
            Ok(client) => FfiRetsResult::ok_client(client),
            Err(e) => FfiRetsResult::from_error(e),
        }
    })
    .unwrap_or_else(|_| FfiRetsResult::panic("panic during rets_client_connect"))
}

/// Log out. Calling it again, or on a server without `Logout`, succeeds.
#[unsafe(no_mangle)]
pub extern "C" fn rets_client_disconnect(client: *mut FfiRetsClient) -> *mut FfiRetsResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiRetsResult::null_arg("client");
        }
        let client = unsafe { &mut *client };
        match client.inner.disconnect() {
            Ok(()) => FfiRetsResult::ok_empty(),
            Err(e) => FfiRetsResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiRetsResult::panic("panic during rets_client_disconnect"))
}

/// Free a client taken from `rets_client_connect`. Safe to call with null.
///
/// Does not log out; call `rets_client_disconnect` first for that.
#[unsafe(no_mangle)]
pub extern "C" fn rets_client_free(client: *mut FfiRetsClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Run a search and return a `Cursor` result.
///
/// `params_json` may be null, or a JSON object of extra search arguments
/// such as `{"Limit": 10, "Select": "ListingID,City"}`.
/// The rows stay in the client; read them with `rets_fetch_row` and release
/// them with `rets_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn rets_search_query(
    client: *mut FfiRetsClient,
    resource: *const c_char,
    class: *const c_char,
    query: *const c_char,
    params_json: *const c_char,
) -> *mut FfiRetsResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiRetsResult::null_arg("client");
        }
        let Some(resource) = (unsafe { str_arg(resource) }) else {
            return FfiRetsResult::null_arg("resource");
        };
        let Some(class) = (unsafe { str_arg(class) }) else {
            return FfiRetsResult::null_arg("class");
        };
        let Some(query) = (unsafe { str_arg(query) }) else {
            return FfiRetsResult::null_arg("query");
        };

        let mut request = SearchRequest::new(resource, class, query);
        if !params_json.is_null() {
            let Some(pairs) = (unsafe { str_arg(params_json) }).and_then(json_pairs) else {
                return FfiRetsResult::null_arg("params_json");
            };
            for (name, value) in &pairs {
                request = request.param(name, value);
            }
        }

        let client = unsafe { &mut *client };
        let id = match client.inner.search_query(&request) {
            Ok(id) => id,
            Err(e) => return FfiRetsResult::from_error(e),
        };
        FfiRetsResult::ok_cursor(FfiSearchCursor {
            id,
            num_rows: client.inner.num_rows(id).unwrap_or(0) as u64,
            total_records: client.inner.total_records_found(id).unwrap_or(0),
            maxrows_reached: client.inner.is_maxrows_reached(id).unwrap_or(false),
        })
    }))
    .unwrap_or_else(|_| FfiRetsResult::panic("panic during rets_search_query"))
}

/// Next row of `cursor` as a JSON object string, or null once exhausted.
///
/// The caller must free the returned string with `rets_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn rets_fetch_row(client: *mut FfiRetsClient, cursor: u32) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return std::ptr::null_mut();
        }
        let client = unsafe { &mut *client };
        client
            .inner
            .fetch_row(cursor)
            .and_then(|row| serde_json::to_string(&row).ok())
            .map_or(std::ptr::null_mut(), c_string)
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Drop the unread rows of `cursor`. Returns false for an unknown cursor.
#[unsafe(no_mangle)]
pub extern "C" fn rets_free_result(client: *mut FfiRetsClient, cursor: u32) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return false;
        }
        let client = unsafe { &mut *client };
        client.inner.free_result(cursor)
    }))
    .unwrap_or(false)
}

/// Build a DMQL query from a JSON object of field names to criteria.
///
/// `{"ListPrice": "150000+", "Status": "A"}` becomes
/// `(ListPrice=150000+),(Status=A)`. Returns null for null or invalid JSON.
/// The caller must free the returned string with `rets_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn rets_prepare_query(criteria_json: *const c_char) -> *mut c_char {
    catch_unwind(|| {
        let Some(pairs) = (unsafe { str_arg(criteria_json) }).and_then(json_pairs) else {
            return std::ptr::null_mut();
        };
        c_string(rets_core::prepare_query(pairs))
    })
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Retrieve objects and return an `ObjectList` result.
///
/// `ids` is a comma-separated list of resource ids and `indices` a `,` or
/// `:` separated list of object indices (`*` or empty for all).
#[unsafe(no_mangle)]
pub extern "C" fn rets_get_object(
    client: *mut FfiRetsClient,
    resource: *const c_char,
    object_type: *const c_char,
    ids: *const c_char,
    indices: *const c_char,
    location: bool,
) -> *mut FfiRetsResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiRetsResult::null_arg("client");
        }
        let Some(resource) = (unsafe { str_arg(resource) }) else {
            return FfiRetsResult::null_arg("resource");
        };
        let Some(object_type) = (unsafe { str_arg(object_type) }) else {
            return FfiRetsResult::null_arg("object_type");
        };
        let Some(ids) = (unsafe { str_arg(ids) }) else {
            return FfiRetsResult::null_arg("ids");
        };
        let indices = unsafe { str_arg(indices) }.unwrap_or("*");

        let request = ObjectRequest::new(resource, object_type, &[ids], indices).location(location);
        let client = unsafe { &mut *client };
        match client.inner.get_object(&request) {
            Ok(records) => FfiRetsResult::ok_objects(records),
            Err(e) => FfiRetsResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiRetsResult::panic("panic during rets_get_object"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiRetsResult` and its payload. Safe to call with null.
///
/// A `Client` payload is left alone; it belongs to the caller.
#[unsafe(no_mangle)]
pub extern "C" fn rets_free_envelope(result: *mut FfiRetsResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        free_c_string(result.error_message);
        if result.data.is_null() {
            return;
        }
        match result.data_tag {
            FfiDataTag::None | FfiDataTag::Client => {}
            FfiDataTag::Cursor => {
                drop(unsafe { Box::from_raw(result.data as *mut FfiSearchCursor) });
            }
            FfiDataTag::ObjectList => {
                let list = unsafe { Box::from_raw(result.data as *mut FfiObjectList) };
                for record in unsafe { from_raw_parts(list.items, list.len) } {
                    record.free_fields();
                }
            }
        }
    });
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn rets_free_string(s: *mut c_char) {
    let _ = catch_unwind(|| free_c_string(s));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
