//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible fields: `*mut c_char`
//! for strings (null when absent), pointer plus length for byte payloads and
//! arrays, and enums with explicit discriminants. Constructors live here so
//! `lib.rs` stays focused on the `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use rets_core::{ObjectRecord, RetsClient, RetsError};

/// Opaque handle to a logged-in `RetsClient`.
pub struct FfiRetsClient {
    pub(crate) inner: RetsClient,
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Heap C string for `s`. Interior NULs are dropped rather than failing.
pub(crate) fn c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    let cstring = CString::new(s).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    cstring.into_raw()
}

fn c_string_opt(s: Option<String>) -> *mut c_char {
    s.map_or(std::ptr::null_mut(), c_string)
}

/// Release a string produced by [`c_string`]. Null is ignored.
pub(crate) fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Hand a vector to C as pointer + length. Empty vectors become null.
fn into_raw_parts<T>(items: Vec<T>) -> (*mut T, u32) {
    if items.is_empty() {
        return (std::ptr::null_mut(), 0);
    }
    let boxed = items.into_boxed_slice();
    let len = boxed.len() as u32;
    (Box::into_raw(boxed) as *mut T, len)
}

/// Reclaim a vector produced by [`into_raw_parts`].
pub(crate) unsafe fn from_raw_parts<T>(ptr: *mut T, len: u32) -> Vec<T> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    let slice = std::ptr::slice_from_raw_parts_mut(ptr, len as usize);
    unsafe { Box::from_raw(slice) }.into_vec()
}

// ---------------------------------------------------------------------------
// Result payloads
// ---------------------------------------------------------------------------

/// Summary of a finished search.
#[repr(C)]
pub struct FfiSearchCursor {
    pub id: u32,
    pub num_rows: u64,
    pub total_records: u64,
    pub maxrows_reached: bool,
}

/// One retrieved object. String fields are null when the header was absent.
#[repr(C)]
pub struct FfiObjectRecord {
    pub content_id: *mut c_char,
    pub object_id: *mut c_char,
    pub content_type: *mut c_char,
    pub mime_version: *mut c_char,
    pub location: *mut c_char,
    pub preferred: *mut c_char,
    pub content_description: *mut c_char,
    pub data: *mut u8,
    pub data_len: u32,
    pub success: bool,
    /// Server reply code for a failed object, 0 otherwise.
    pub reply_code: u32,
    pub reply_text: *mut c_char,
}

impl FfiObjectRecord {
    fn from_core(record: ObjectRecord) -> Self {
        let (reply_code, reply_text) = match record.error {
            Some(e) => (e.code, c_string(e.text)),
            None => (0, std::ptr::null_mut()),
        };
        let (data, data_len) = into_raw_parts(record.data);
        FfiObjectRecord {
            content_id: c_string_opt(record.content_id),
            object_id: c_string_opt(record.object_id),
            content_type: c_string_opt(record.content_type),
            mime_version: c_string_opt(record.mime_version),
            location: c_string_opt(record.location),
            preferred: c_string_opt(record.preferred),
            content_description: c_string_opt(record.content_description),
            data,
            data_len,
            success: record.success,
            reply_code,
            reply_text,
        }
    }

    /// Free every owned field (but not the struct itself).
    pub(crate) fn free_fields(self) {
        for s in [
            self.content_id,
            self.object_id,
            self.content_type,
            self.mime_version,
            self.location,
            self.preferred,
            self.content_description,
            self.reply_text,
        ] {
            free_c_string(s);
        }
        drop(unsafe { from_raw_parts(self.data, self.data_len) });
    }
}

/// Objects returned by `rets_get_object`, in response order.
#[repr(C)]
pub struct FfiObjectList {
    pub items: *mut FfiObjectRecord,
    pub len: u32,
}

// ---------------------------------------------------------------------------
// Result envelope
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiRetsResult`, one per `RetsError` variant.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Configuration = 1,
    Transport = 2,
    Network = 3,
    XmlParse = 4,
    Protocol = 5,
    Authentication = 6,
    AbuseGuard = 7,
    Panic = 8,
    NullArg = 9,
}

/// Tag that tells `rets_free_envelope` what `FfiRetsResult::data` points to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiDataTag {
    None = 0,
    /// `FfiRetsClient`; ownership passes to the caller.
    Client = 1,
    Cursor = 2,
    ObjectList = 3,
}

/// Result envelope for every fallible operation.
///
/// On success `error_code` is `Ok`, `error_message` is null and `data`
/// points to the payload named by `data_tag`. On failure `data` is null,
/// `error_message` is a human-readable C string, `http_status` is set for
/// transport errors and `reply_code` for server reply errors.
#[repr(C)]
pub struct FfiRetsResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub reply_code: u32,
    pub data_tag: FfiDataTag,
    pub data: *mut c_void,
}

impl FfiRetsResult {
    fn ok(data_tag: FfiDataTag, data: *mut c_void) -> *mut Self {
        Box::into_raw(Box::new(FfiRetsResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            reply_code: 0,
            data_tag,
            data,
        }))
    }

    fn failure(error_code: FfiErrorCode, message: String, http_status: u16, reply_code: u32) -> *mut Self {
        Box::into_raw(Box::new(FfiRetsResult {
            error_code,
            error_message: c_string(message),
            http_status,
            reply_code,
            data_tag: FfiDataTag::None,
            data: std::ptr::null_mut(),
        }))
    }

    pub(crate) fn ok_empty() -> *mut Self {
        Self::ok(FfiDataTag::None, std::ptr::null_mut())
    }

    pub(crate) fn ok_client(client: RetsClient) -> *mut Self {
        let handle = Box::into_raw(Box::new(FfiRetsClient { inner: client }));
        Self::ok(FfiDataTag::Client, handle as *mut c_void)
    }

    pub(crate) fn ok_cursor(cursor: FfiSearchCursor) -> *mut Self {
        Self::ok(FfiDataTag::Cursor, Box::into_raw(Box::new(cursor)) as *mut c_void)
    }

    pub(crate) fn ok_objects(records: Vec<ObjectRecord>) -> *mut Self {
        let items: Vec<FfiObjectRecord> = records.into_iter().map(FfiObjectRecord::from_core).collect();
        let (items, len) = into_raw_parts(items);
        let list = Box::new(FfiObjectList { items, len });
        Self::ok(FfiDataTag::ObjectList, Box::into_raw(list) as *mut c_void)
    }

    pub(crate) fn from_error(err: RetsError) -> *mut Self {
        let message = err.to_string();
        let reply_code = err.reply_code().unwrap_or(0);
        let (code, http_status) = match &err {
            RetsError::Configuration(_) => (FfiErrorCode::Configuration, 0),
            RetsError::Transport { status, .. } => (FfiErrorCode::Transport, *status),
            RetsError::Network(_) => (FfiErrorCode::Network, 0),
            RetsError::XmlParse(_) => (FfiErrorCode::XmlParse, 0),
            RetsError::Protocol { .. } => (FfiErrorCode::Protocol, 0),
            RetsError::Authentication { .. } => (FfiErrorCode::Authentication, 0),
            RetsError::AbuseGuard { .. } => (FfiErrorCode::AbuseGuard, 0),
        };
        Self::failure(code, message, http_status, reply_code)
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::NullArg, format!("null or non-UTF-8 argument: {name}"), 0, 0)
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::failure(FfiErrorCode::Panic, msg.to_string(), 0, 0)
    }
}
