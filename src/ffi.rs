//! FFI bindings for Synheart Sleep
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `sleep_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::error::ComputeError;
use crate::pipeline::{
    analyze_night_json, normalize_hypnogram_json, score_night_json, timeline_night_json, Envelope,
    NightRequest, SleepEngine,
};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Finish a call: hand back the JSON or record the error and return NULL
fn respond(result: Result<String, ComputeError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Read a required request string and an optional config string
unsafe fn request_args(
    json: *const c_char,
    config_json: *const c_char,
) -> Option<(String, Option<String>)> {
    match cstr_to_string(json) {
        Some(s) => Some((s, cstr_to_string(config_json))),
        None => {
            set_last_error("Invalid JSON string pointer");
            None
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score one night from a JSON request.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `sleep_free_string`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_score_json(
    json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((json_str, config)) = request_args(json, config_json) else {
        return ptr::null_mut();
    };
    respond(score_night_json(&json_str, config.as_deref()))
}

/// Full night analysis (score, distribution, physiology, timeline) from JSON.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `sleep_free_string`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_analyze_json(
    json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((json_str, config)) = request_args(json, config_json) else {
        return ptr::null_mut();
    };
    respond(analyze_night_json(&json_str, config.as_deref()))
}

/// Phase timeline for one night from JSON.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `sleep_free_string`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_timeline_json(
    json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((json_str, config)) = request_args(json, config_json) else {
        return ptr::null_mut();
    };
    respond(timeline_night_json(&json_str, config.as_deref()))
}

/// Normalize a JSON array of persisted phase rows into a hypnogram.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sleep_free_string`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_hypnogram_json(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };
    respond(normalize_hypnogram_json(&json_str))
}

// ============================================================================
// Engine Handle API
// ============================================================================

/// Opaque handle to a configured SleepEngine
pub struct SleepEngineHandle {
    engine: SleepEngine,
}

/// Create an engine from a JSON configuration (NULL for defaults).
///
/// # Safety
/// - Returns a pointer to a newly allocated engine.
/// - Must be freed with `sleep_engine_free`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_engine_new(config_json: *const c_char) -> *mut SleepEngineHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json) {
        Some(s) => EngineConfig::from_json(&s),
        None => Ok(EngineConfig::default()),
    };

    match config.and_then(SleepEngine::new) {
        Ok(engine) => Box::into_raw(Box::new(SleepEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sleep_engine_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sleep_engine_free(engine: *mut SleepEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Score one night with a configured engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sleep_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sleep_free_string`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_engine_score(
    engine: *const SleepEngineHandle,
    json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    respond(
        serde_json::from_str::<NightRequest>(&json_str)
            .map_err(ComputeError::from)
            .and_then(|request| {
                let breakdown = handle.engine.score(&request);
                Ok(serde_json::to_string(&Envelope::new(breakdown))?)
            }),
    )
}

/// Analyze one night with a configured engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sleep_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sleep_free_string`.
/// - Returns NULL on error; call `sleep_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_engine_analyze(
    engine: *const SleepEngineHandle,
    json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    respond(
        serde_json::from_str::<NightRequest>(&json_str)
            .map_err(ComputeError::from)
            .and_then(|request| {
                let analysis = handle.engine.analyze(&request);
                Ok(serde_json::to_string(&Envelope::new(analysis))?)
            }),
    )
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Synheart Sleep functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Synheart Sleep function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sleep_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Synheart Sleep call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn sleep_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the engine version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn sleep_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
