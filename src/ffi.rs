//! C FFI interface for hosting environments.
//!
//! All functions exported here are callable through the generated C header.
//! Naming convention: sshexec_<object>_<action>
//!
//! Results that can fail are returned as JSON strings:
//! `{"ok": true, ...}` or `{"ok": false, "kind": "...", "message": "..."}`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::ssh::arguments::ScriptRequest;
use crate::ssh::connector::SshConnector;
use crate::ssh::{SshConfig, SshError};

/// Opaque pointer to an SshConnector.
pub type SshexecConnectorHandle = *mut SshConnector;

fn json_to_c(value: serde_json::Value) -> *mut c_char {
    match CString::new(value.to_string()) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn error_json(err: &SshError) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "kind": err.kind(),
        "message": err.to_string(),
    })
}

/// Read a C string argument, `None` when null or not UTF-8.
fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok() }
}

// ═══════════════════════════════════════════════════════════
// Connector FFI
// ═══════════════════════════════════════════════════════════

/// Create a connector from a JSON configuration document.
/// Returns null on invalid configuration.
#[no_mangle]
pub extern "C" fn sshexec_connector_create(config_json: *const c_char) -> SshexecConnectorHandle {
    let json = match c_str(config_json) {
        Some(s) => s,
        None => {
            log::error!("Connector configuration is missing or not UTF-8");
            return std::ptr::null_mut();
        }
    };

    match SshConfig::from_json(json).and_then(SshConnector::new) {
        Ok(connector) => Box::into_raw(Box::new(connector)),
        Err(e) => {
            log::error!("Failed to create connector: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Destroy a connector.
#[no_mangle]
pub extern "C" fn sshexec_connector_destroy(handle: SshexecConnectorHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Liveness check. Returns 1 when alive, -1 on invalid handle.
#[no_mangle]
pub extern "C" fn sshexec_connector_check_alive(handle: SshexecConnectorHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let connector = unsafe { &*handle };
    match connector.check_alive() {
        Ok(()) => 1,
        Err(_) => 0,
    }
}

/// Connect and authenticate without running a command.
/// Returns JSON: {"ok": true} or an error object.
/// Caller must free with sshexec_string_free.
#[no_mangle]
pub extern "C" fn sshexec_connector_test(handle: SshexecConnectorHandle) -> *mut c_char {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let connector = unsafe { &*handle };

    match connector.test_blocking() {
        Ok(()) => json_to_c(serde_json::json!({ "ok": true })),
        Err(e) => json_to_c(error_json(&e)),
    }
}

/// Run a script.
/// `request_json`: {"language": "...", "script": "...", "arguments": [[key|null, value|null], ...]}
/// Returns JSON: {"ok": true, "output": "..."} or an error object.
/// Caller must free with sshexec_string_free.
#[no_mangle]
pub extern "C" fn sshexec_run_script(
    handle: SshexecConnectorHandle,
    request_json: *const c_char,
) -> *mut c_char {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let connector = unsafe { &*handle };

    let request: ScriptRequest = match c_str(request_json).map(serde_json::from_str) {
        Some(Ok(request)) => request,
        Some(Err(e)) => {
            let err = SshError::Configuration(format!("Invalid script request: {}", e));
            return json_to_c(error_json(&err));
        }
        None => {
            let err = SshError::Configuration("Script request is missing or not UTF-8".to_string());
            return json_to_c(error_json(&err));
        }
    };

    match connector.run_script_blocking(&request) {
        Ok(output) => json_to_c(serde_json::json!({ "ok": true, "output": output })),
        Err(e) => json_to_c(error_json(&e)),
    }
}

// ═══════════════════════════════════════════════════════════
// Utility FFI
// ═══════════════════════════════════════════════════════════

/// Free a string allocated by Rust.
#[no_mangle]
pub extern "C" fn sshexec_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Initialize the Rust logger.
#[no_mangle]
pub extern "C" fn sshexec_init() {
    let _ = env_logger::try_init();
    log::info!("sshexec core initialized");
}
