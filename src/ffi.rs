//! FFI bindings for FACS Flux
//!
//! This module provides C-compatible functions for driving the expression
//! engine from other languages. All functions use C strings (null-terminated)
//! and return allocated memory that must be freed by the caller using
//! `facs_free_string`.
//!
//! The engine handle is not thread-safe: use it from one thread at a time.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::engine::ExpressionEngine;
use crate::types::{ActionUnits, FrameInput};

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

/// Caller must free the result
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

/// Opaque handle to an ExpressionEngine
pub struct FacsEngineHandle {
    engine: ExpressionEngine,
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Create a new expression engine.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for the
///   bundled defaults.
/// - Returns a pointer that must be freed with `facs_engine_free`.
/// - Returns NULL on error; call `facs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_new(config_json: *const c_char) -> *mut FacsEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let Some(json) = cstr_to_string(config_json) else {
            set_last_error("Invalid config string pointer");
            return ptr::null_mut();
        };
        match EngineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match ExpressionEngine::new(config) {
        Ok(engine) => Box::into_raw(Box::new(FacsEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an expression engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_free(engine: *mut FacsEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

// ============================================================================
// Frame Processing
// ============================================================================

/// Process one pre-detected frame.
///
/// Input: `{"timestamp", "width", "height", "landmarks", "blendshapes"}`.
/// Returns the frame result as JSON, or the string `null` when the frame
/// carries no face.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
/// - `frame_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `facs_free_string`.
/// - Returns NULL on error; call `facs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_process(
    engine: *mut FacsEngineHandle,
    frame_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let Some(json) = cstr_to_string(frame_json) else {
        set_last_error("Invalid frame string pointer");
        return ptr::null_mut();
    };

    let input: FrameInput = match serde_json::from_str(&json) {
        Ok(input) => input,
        Err(e) => {
            set_last_error(&format!("Invalid frame JSON: {e}"));
            return ptr::null_mut();
        }
    };

    let (frame, face) = input.into_parts();
    let result = handle.engine.process_detection(&frame, &face);
    to_json_cstr(&result)
}

/// Calibrate the neutral face from an AU map (`{"AU4": 0.2, ...}`).
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
/// - `aus_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_calibrate(
    engine: *mut FacsEngineHandle,
    aus_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let Some(json) = cstr_to_string(aus_json) else {
        set_last_error("Invalid AU string pointer");
        return -1;
    };

    match serde_json::from_str::<ActionUnits>(&json) {
        Ok(aus) => {
            handle.engine.calibrate(&aus);
            0
        }
        Err(e) => {
            set_last_error(&format!("Invalid AU JSON: {e}"));
            -1
        }
    }
}

/// Clear the manual calibration offsets.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_reset_calibration(engine: *mut FacsEngineHandle) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    (*engine).engine.reset_calibration();
    0
}

/// Forget physical-validation baselines; the next frame sets new ones.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_reset_validation(engine: *mut FacsEngineHandle) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    (*engine).engine.reset_validation();
    0
}

/// Latest decision as JSON, or the string `null` before the first window.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
/// - Returns a newly allocated string that must be freed with `facs_free_string`.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_current_decision(engine: *mut FacsEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    to_json_cstr(&(*engine).engine.current_decision())
}

/// Empty the aggregation buffer.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_clear_buffer(engine: *mut FacsEngineHandle) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    (*engine).engine.clear_buffer();
    0
}

/// Save the calibration to JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
/// - Returns a newly allocated string that must be freed with `facs_free_string`.
/// - Returns NULL on error; call `facs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_save_calibration(engine: *mut FacsEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    match (*engine).engine.save_calibration() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Load a calibration saved by `facs_engine_save_calibration`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `facs_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn facs_engine_load_calibration(
    engine: *mut FacsEngineHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return -1;
    };

    match handle.engine.load_calibration(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by FACS Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a FACS Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn facs_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next FACS Flux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn facs_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn facs_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
