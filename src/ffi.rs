//! FFI bindings for Focus Flux
//!
//! C-compatible functions for driving the adaptation controller from a host
//! UI. All strings are null-terminated UTF-8 JSON; strings returned by Flux
//! must be freed with `focus_flux_free_string`.
//!
//! Every call that takes `now_ms` uses it as the current time in Unix
//! milliseconds. Pass 0 (or any non-positive value) to use the system clock.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::controller::AdaptationController;
use crate::policy::ContentTypePolicy;
use crate::signal::GeneratedContent;
use crate::types::{ContentArtifact, ContentType};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn to_json_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn resolve_now(now_ms: i64) -> DateTime<Utc> {
    if now_ms > 0 {
        Utc.timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Threshold policy decision, returned as a content type name.
///
/// # Safety
/// - `current` must be a valid null-terminated C string naming a content type.
/// - Returns a newly allocated string that must be freed with `focus_flux_free_string`.
/// - Returns NULL on error; call `focus_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_decide(attention_level: i32, current: *const c_char) -> *mut c_char {
    clear_last_error();

    if !(0..=100).contains(&attention_level) {
        set_last_error("attention_level must be between 0 and 100");
        return ptr::null_mut();
    }

    let current = match cstr_to_string(current).map(|s| s.parse::<ContentType>()) {
        Some(Ok(t)) => t,
        Some(Err(e)) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
        None => {
            set_last_error("Invalid content type string pointer");
            return ptr::null_mut();
        }
    };

    string_to_cstr(ContentTypePolicy::decide(attention_level as u8, current).as_str())
}

// ============================================================================
// Stateful Controller API
// ============================================================================

/// Opaque handle to an AdaptationController
pub struct FocusFluxHandle {
    controller: AdaptationController,
}

/// Create a controller. A negative cooldown or a non-positive break length
/// selects the default; values above 24 hours are rejected.
///
/// # Safety
/// - Returns a pointer that must be freed with `focus_flux_controller_free`.
/// - Returns NULL on error; call `focus_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_new(cooldown_ms: i64, break_ms: i64) -> *mut FocusFluxHandle {
    clear_last_error();

    let defaults = ControllerConfig::default();
    let config = ControllerConfig {
        cooldown_ms: if cooldown_ms < 0 {
            defaults.cooldown_ms
        } else {
            cooldown_ms as u64
        },
        break_ms: if break_ms <= 0 {
            defaults.break_ms
        } else {
            break_ms as u64
        },
    };
    if let Err(e) = config.validate() {
        set_last_error(&e.to_string());
        return ptr::null_mut();
    }

    let handle = Box::new(FocusFluxHandle {
        controller: AdaptationController::new(config),
    });
    Box::into_raw(handle)
}

/// Free a controller.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_free(handle: *mut FocusFluxHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Install a base artifact (`{"focusScore", "type", "data"}`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - `artifact_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_load(
    handle: *mut FocusFluxHandle,
    artifact_json: *const c_char,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return -1;
    }
    let handle = &mut *handle;

    let json = match cstr_to_string(artifact_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<ContentArtifact>(&json) {
        Ok(artifact) => {
            handle.controller.load_artifact(artifact, resolve_now(now_ms));
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Mark ingestion as failed: content is cleared.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_ingestion_failed(
    handle: *mut FocusFluxHandle,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return -1;
    }
    (*handle).controller.ingestion_failed(resolve_now(now_ms));
    0
}

/// Process one attention signal and return the effect as JSON.
///
/// Malformed signals are dropped and produce `{"effect":"noOp"}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - `signal_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `focus_flux_free_string`.
/// - Returns NULL on error; call `focus_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_signal(
    handle: *mut FocusFluxHandle,
    signal_json: *const c_char,
    now_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    let json = match cstr_to_string(signal_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let effect = handle.controller.on_raw_signal(&json, resolve_now(now_ms));
    to_json_cstr(&effect)
}

/// Dismiss the running break.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - Returns 1 if a break ended, 0 if none was running, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_dismiss_break(
    handle: *mut FocusFluxHandle,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return -1;
    }
    match (*handle).controller.dismiss_break(resolve_now(now_ms)) {
        Some(_) => 1,
        None => 0,
    }
}

/// End the break with the given session id, if it is still running.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - `session_id` must be a valid null-terminated C string holding a UUID.
/// - Returns 1 if the break ended, 0 if it had already ended, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_expire_break(
    handle: *mut FocusFluxHandle,
    session_id: *const c_char,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return -1;
    }

    let session_id = match cstr_to_string(session_id).map(|s| Uuid::parse_str(&s)) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            set_last_error(&e.to_string());
            return -1;
        }
        None => {
            set_last_error("Invalid session id string pointer");
            return -1;
        }
    };

    match (*handle).controller.expire_break(session_id, resolve_now(now_ms)) {
        Some(_) => 1,
        None => 0,
    }
}

/// Pending payload refresh as JSON, or the string `null` when none is needed.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - Returns a newly allocated string that must be freed with `focus_flux_free_string`.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_pending_refresh(handle: *mut FocusFluxHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return ptr::null_mut();
    }
    to_json_cstr(&(*handle).controller.pending_refresh())
}

/// Complete a refresh with a generated payload (`{"type", "data"}`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - `payload_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error (including stale or mismatched payloads).
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_fulfil_refresh(
    handle: *mut FocusFluxHandle,
    revision: u64,
    payload_json: *const c_char,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return -1;
    }
    let handle = &mut *handle;

    let json = match cstr_to_string(payload_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    let payload = match serde_json::from_str::<GeneratedContent>(&json)
        .map_err(crate::error::AdaptError::from)
        .and_then(|g| g.resolve())
    {
        Ok(payload) => payload,
        Err(e) => {
            set_last_error(&e.to_string());
            return -1;
        }
    };

    match handle
        .controller
        .fulfil_refresh(revision, payload, resolve_now(now_ms))
    {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Current viewer snapshot as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `focus_flux_controller_new`.
/// - Returns a newly allocated string that must be freed with `focus_flux_free_string`.
/// - Returns NULL on error; call `focus_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_controller_snapshot(
    handle: *mut FocusFluxHandle,
    now_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null controller pointer");
        return ptr::null_mut();
    }
    to_json_cstr(&(*handle).controller.snapshot(resolve_now(now_ms)))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Flux function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Flux library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn focus_flux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    // 2024-01-15T14:00:00Z
    const T0: i64 = 1_705_327_200_000;

    fn lecture_json() -> CString {
        CString::new(
            r###"{
                "focusScore": 0,
                "type": "text",
                "data": { "title": "OS", "content": "## Operating Systems" }
            }"###,
        )
        .unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        focus_flux_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_decide() {
        let current = CString::new("mindmap").unwrap();
        unsafe {
            assert_eq!(take_string(focus_flux_decide(95, current.as_ptr())), "mindmap");
            assert_eq!(take_string(focus_flux_decide(15, current.as_ptr())), "react");

            assert!(focus_flux_decide(101, current.as_ptr()).is_null());
            assert!(!focus_flux_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_controller_lifecycle() {
        unsafe {
            let handle = focus_flux_controller_new(10_000, 300_000);
            assert!(!handle.is_null());

            let artifact = lecture_json();
            assert_eq!(focus_flux_controller_load(handle, artifact.as_ptr(), T0), 0);

            let signal = CString::new(r#"{"attentionLevel": 70, "shouldSwitchContent": true}"#).unwrap();
            let effect = take_string(focus_flux_controller_signal(handle, signal.as_ptr(), T0 + 1_000));
            let effect: serde_json::Value = serde_json::from_str(&effect).unwrap();
            assert_eq!(effect["effect"], "contentReplaced");
            assert_eq!(effect["artifact"]["type"], "mindmap");

            let pending = take_string(focus_flux_controller_pending_refresh(handle));
            let pending: serde_json::Value = serde_json::from_str(&pending).unwrap();
            let revision = pending["revision"].as_u64().unwrap();

            let payload = CString::new(
                r#"{"type": "mindmap", "data": {"root": {"title": "Operating Systems"}}}"#,
            )
            .unwrap();
            assert_eq!(
                focus_flux_controller_fulfil_refresh(handle, revision, payload.as_ptr(), T0 + 2_000),
                0
            );
            // Same revision again is stale
            assert_eq!(
                focus_flux_controller_fulfil_refresh(handle, revision, payload.as_ptr(), T0 + 3_000),
                -1
            );

            let snapshot = take_string(focus_flux_controller_snapshot(handle, T0 + 3_000));
            let snapshot: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
            assert_eq!(snapshot["contentLoaded"], true);
            assert_eq!(snapshot["pendingRefresh"], false);

            focus_flux_controller_free(handle);
        }
    }

    #[test]
    fn test_ffi_break_controls() {
        unsafe {
            let handle = focus_flux_controller_new(0, 0);
            let artifact = lecture_json();
            assert_eq!(focus_flux_controller_load(handle, artifact.as_ptr(), T0), 0);

            let signal = CString::new(
                r#"{"attentionLevel": 30, "shouldSwitchContent": true, "suggestBreak": true}"#,
            )
            .unwrap();
            let effect = take_string(focus_flux_controller_signal(handle, signal.as_ptr(), T0));
            let effect: serde_json::Value = serde_json::from_str(&effect).unwrap();
            assert_eq!(effect["effect"], "breakActivated");

            let session_id = CString::new(effect["session"]["id"].as_str().unwrap()).unwrap();
            assert_eq!(focus_flux_controller_dismiss_break(handle, T0 + 1_000), 1);
            assert_eq!(focus_flux_controller_dismiss_break(handle, T0 + 2_000), 0);
            assert_eq!(
                focus_flux_controller_expire_break(handle, session_id.as_ptr(), T0 + 300_000),
                0
            );

            focus_flux_controller_free(handle);
        }
    }

    #[test]
    fn test_ffi_malformed_signal_is_noop() {
        unsafe {
            let handle = focus_flux_controller_new(-1, -1);
            let signal = CString::new("not json").unwrap();
            let effect = take_string(focus_flux_controller_signal(handle, signal.as_ptr(), 0));
            assert_eq!(effect, r#"{"effect":"noOp"}"#);
            focus_flux_controller_free(handle);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let handle = focus_flux_controller_new(0, 0);
            let invalid = CString::new(r#"{"type": "text", "data": null}"#).unwrap();
            assert_eq!(focus_flux_controller_load(handle, invalid.as_ptr(), 0), -1);

            let error = focus_flux_last_error();
            assert!(!error.is_null());
            assert!(!CStr::from_ptr(error).to_str().unwrap().is_empty());

            assert_eq!(focus_flux_controller_dismiss_break(ptr::null_mut(), 0), -1);
            focus_flux_controller_free(handle);
        }
    }

    #[test]
    fn test_ffi_rejects_unbounded_durations() {
        unsafe {
            assert!(focus_flux_controller_new(i64::MAX, 300_000).is_null());
            assert!(!focus_flux_last_error().is_null());
            assert!(focus_flux_controller_new(10_000, i64::MAX).is_null());

            let handle = focus_flux_controller_new(10_000, 24 * 60 * 60 * 1000);
            assert!(!handle.is_null());
            focus_flux_controller_free(handle);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = focus_flux_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
