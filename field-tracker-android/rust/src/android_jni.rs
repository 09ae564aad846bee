use crate::error::{throw_java_exception, BridgeError, JResult};
use crate::session::TrackerSession;
use field_tracker_rs::{CycleOutcome, SkipReason};
use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jdouble, jint, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use std::sync::{Arc, Mutex};

// Global tracker - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref GLOBAL_TRACKER: Mutex<Option<Arc<TrackerSession>>> = Mutex::new(None);
}

fn get_tracker() -> JResult<Arc<TrackerSession>> {
    let guard = GLOBAL_TRACKER.lock().map_err(|_| {
        BridgeError::Internal("Failed to acquire global tracker lock".to_string())
    })?;
    guard.as_ref().map(Arc::clone).ok_or(BridgeError::NotInitialized)
}

fn read_string(env: &mut JNIEnv, value: &JString) -> JResult<String> {
    env.get_string(value)
        .map(|s| s.into())
        .map_err(|e| BridgeError::JniError(format!("Failed to read Java string: {}", e)))
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// Map a unit result to the 0 / -1 convention, throwing on error
fn status(env: &mut JNIEnv, result: JResult<()>) -> jint {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

fn init_logging() {
    #[cfg(target_os = "android")]
    {
        let _ = android_log::init("FieldTracker");
    }
}

/// JNI: Build the tracker over `storageDir` with optional JSON config.
/// Calling it again replaces the previous tracker.
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_init(
    mut env: JNIEnv,
    _class: JClass,
    storage_dir: JString,
    config_json: JString,
) -> jint {
    let result = init_impl(&mut env, &storage_dir, &config_json);
    status(&mut env, result)
}

fn init_impl(env: &mut JNIEnv, storage_dir: &JString, config_json: &JString) -> JResult<()> {
    init_logging();

    let dir = read_string(env, storage_dir)?;
    let config = if config_json.is_null() {
        String::new()
    } else {
        read_string(env, config_json)?
    };

    let session = Arc::new(TrackerSession::open(&dir, &config)?);
    let mut guard = GLOBAL_TRACKER.lock().map_err(|_| {
        BridgeError::Internal("Failed to acquire global tracker lock".to_string())
    })?;
    *guard = Some(session);
    Ok(())
}

/// JNI: Set or clear (null/empty) the bearer token
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_setToken(
    mut env: JNIEnv,
    _class: JClass,
    token: JString,
) -> jint {
    let result = set_token_impl(&mut env, &token);
    status(&mut env, result)
}

fn set_token_impl(env: &mut JNIEnv, token: &JString) -> JResult<()> {
    let tracker = get_tracker()?;
    let token = if token.is_null() {
        None
    } else {
        Some(read_string(env, token)?)
    };
    tracker.set_token(token);
    Ok(())
}

/// JNI: Network state from ConnectivityManager; reconnecting syncs the queue
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_setConnectivity(
    mut env: JNIEnv,
    _class: JClass,
    connected: jboolean,
) -> jint {
    let result = get_tracker().map(|t| t.set_connectivity(connected != JNI_FALSE));
    status(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_setPermissions(
    mut env: JNIEnv,
    _class: JClass,
    foreground: jboolean,
    background: jboolean,
) -> jint {
    let result =
        get_tracker().map(|t| t.set_permissions(foreground != JNI_FALSE, background != JNI_FALSE));
    status(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_setServicesEnabled(
    mut env: JNIEnv,
    _class: JClass,
    enabled: jboolean,
) -> jint {
    let result = get_tracker().map(|t| t.set_services_enabled(enabled != JNI_FALSE));
    status(&mut env, result)
}

/// JNI: Battery level as a fraction 0.0-1.0 (negative when unknown)
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_setBatteryLevel(
    mut env: JNIEnv,
    _class: JClass,
    fraction: jdouble,
) -> jint {
    let result = get_tracker().map(|t| t.set_battery_level(fraction));
    status(&mut env, result)
}

/// JNI: Push a platform location fix
/// Parameters: latitude, longitude, accuracy (m, <= 0 if unknown), timestamp (seconds since epoch)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_pushFix(
    mut env: JNIEnv,
    _class: JClass,
    latitude: jdouble,
    longitude: jdouble,
    accuracy: jdouble,
    timestamp: jdouble,
) -> jint {
    let result =
        get_tracker().and_then(|t| t.push_fix(latitude, longitude, accuracy, timestamp));
    status(&mut env, result)
}

/// JNI: Sample and report now (UI button, attendance)
/// Returns: true if the sample was delivered or stored for delivery
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_sendLocation(
    mut env: JNIEnv,
    _class: JClass,
    is_real_time: jboolean,
) -> jboolean {
    match get_tracker() {
        Ok(tracker) => to_jboolean(tracker.send_location(is_real_time != JNI_FALSE)),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            JNI_FALSE
        }
    }
}

/// JNI: Flush the pending queue
/// Returns: 0 if the queue was delivered (or empty/already syncing), 1 if samples remain
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_syncQueue(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    match get_tracker() {
        Ok(tracker) => {
            let outcome = tracker.sync_queue();
            log::info!("syncQueue: {}", outcome);
            match outcome {
                CycleOutcome::Deferred { .. } | CycleOutcome::Skipped(SkipReason::Offline) => 1,
                _ => 0,
            }
        }
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

/// JNI: Forward a push notification data payload (JSON object)
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_onPushPayload(
    mut env: JNIEnv,
    _class: JClass,
    payload: JString,
    foreground: jboolean,
) -> jint {
    let result = on_push_payload_impl(&mut env, &payload, foreground != JNI_FALSE);
    status(&mut env, result)
}

fn on_push_payload_impl(env: &mut JNIEnv, payload: &JString, foreground: bool) -> JResult<()> {
    let tracker = get_tracker()?;
    let json = read_string(env, payload)?;
    tracker.on_push_payload(&json, foreground)?;
    Ok(())
}

/// JNI: Periodic worker tick. Ignored while startTracking's interval task
/// is registered.
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_onPeriodicTick(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = get_tracker().map(|t| {
        if let Some(outcome) = t.on_periodic_tick() {
            log::info!("onPeriodicTick: {}", outcome);
        }
    });
    status(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_startTracking(
    mut env: JNIEnv,
    _class: JClass,
) -> jboolean {
    match get_tracker() {
        Ok(tracker) => to_jboolean(tracker.start_tracking()),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            JNI_FALSE
        }
    }
}

#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_stopTracking(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = get_tracker().and_then(|t| t.stop_tracking());
    status(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_isTracking(
    mut env: JNIEnv,
    _class: JClass,
) -> jboolean {
    match get_tracker() {
        Ok(tracker) => to_jboolean(tracker.is_tracking()),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            JNI_FALSE
        }
    }
}

/// JNI: Resume tracking after a cold start if it was left on
/// Returns: true if tracking was resumed
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_resumeTracking(
    mut env: JNIEnv,
    _class: JClass,
) -> jboolean {
    match get_tracker() {
        Ok(tracker) => to_jboolean(tracker.resume_tracking()),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            JNI_FALSE
        }
    }
}

/// JNI: Number of samples waiting for delivery
/// Returns: count, or -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_fieldtracker_JniBinding_pendingCount(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    match get_tracker().and_then(|t| t.pending_count()) {
        Ok(count) => count.min(i32::MAX as usize) as jint,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}
