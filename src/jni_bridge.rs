//! JNI entry points for `com.example.oboepassthrough.AudioProcessingService`.
//!
//! The service starts passthrough from `onStartCommand` (after it has gone
//! foreground) and stops it from `onDestroy`. The Kotlin declarations are:
//!
//! ```kotlin
//! private external fun startPassthrough()
//! private external fun stopPassthrough()
//! private external fun nativeCurrentState(): Int
//! private external fun nativeLastErrorCode(): Int
//! ```
//!
//! Start failures are not thrown into Java; the service reads them back
//! with `nativeLastErrorCode()`.
//!
//! The shared object is `liboboe_passthrough.so` (Cargo library names cannot
//! contain `-`), so the hosting app loads it with
//! `System.loadLibrary("oboe_passthrough")` rather than `"native-lib"`.
//!
//! `JNI_OnLoad` only sets up logging: it receives no `Context`, so
//! ndk-context is initialized from the service's application context on the
//! first `startPassthrough()`.

use jni::objects::{GlobalRef, JObject};
use jni::sys::{jint, JNI_VERSION_1_6};
use jni::{JNIEnv, JavaVM};
use once_cell::sync::OnceCell;

use crate::api;
use crate::error::{log_engine_error, EngineError};

/// Application context handed to ndk-context; lives for the process.
static APP_CONTEXT: OnceCell<GlobalRef> = OnceCell::new();

/// Called by the runtime when the library is loaded.
#[no_mangle]
pub extern "system" fn JNI_OnLoad(_vm: JavaVM, _reserved: *mut std::ffi::c_void) -> jint {
    crate::init_logging();
    log::info!("[JNI] native library loaded");
    JNI_VERSION_1_6
}

/// Publish the application context to ndk-context (needed by Oboe and the
/// RECORD_AUDIO check). Runs once per process.
fn ensure_android_context(env: &mut JNIEnv, service: &JObject) -> Result<(), EngineError> {
    APP_CONTEXT
        .get_or_try_init(|| {
            let context = env
                .call_method(service, "getApplicationContext", "()Landroid/content/Context;", &[])
                .and_then(|value| value.l())
                .map_err(jni_error)?;
            let global = env.new_global_ref(&context).map_err(jni_error)?;
            let vm = env.get_java_vm().map_err(jni_error)?;

            // SAFETY: the VM pointer is the process JavaVM and the context is a
            // global reference kept alive by APP_CONTEXT for the rest of the
            // process. OnceCell guarantees this runs at most once.
            unsafe {
                ndk_context::initialize_android_context(
                    vm.get_java_vm_pointer().cast(),
                    global.as_obj().as_raw().cast(),
                );
            }
            log::info!("[JNI] Android context initialized");
            Ok(global)
        })
        .map(|_| ())
}

/// Whether ndk-context has been initialized by this bridge.
pub(crate) fn android_context_ready() -> bool {
    APP_CONTEXT.get().is_some()
}

fn jni_error(err: jni::errors::Error) -> EngineError {
    EngineError::internal(format!("JNI call failed: {}", err))
}

#[no_mangle]
pub extern "system" fn Java_com_example_oboepassthrough_AudioProcessingService_startPassthrough(
    mut env: JNIEnv,
    this: JObject,
) {
    // Without a context the permission check is skipped and Oboe reports
    // whatever it hits at open time.
    if let Err(err) = ensure_android_context(&mut env, &this) {
        log_engine_error(&err, "JNI startPassthrough");
    }
    if let Err(err) = api::start_passthrough() {
        log::warn!(
            "[JNI] startPassthrough failed (retryable: {}): {}",
            err.is_retryable(),
            err
        );
    }
}

#[no_mangle]
pub extern "system" fn Java_com_example_oboepassthrough_AudioProcessingService_stopPassthrough(
    _env: JNIEnv,
    _this: JObject,
) {
    api::stop_passthrough();
}

#[no_mangle]
pub extern "system" fn Java_com_example_oboepassthrough_AudioProcessingService_nativeCurrentState(
    _env: JNIEnv,
    _this: JObject,
) -> jint {
    api::current_state().as_code()
}

#[no_mangle]
pub extern "system" fn Java_com_example_oboepassthrough_AudioProcessingService_nativeLastErrorCode(
    _env: JNIEnv,
    _this: JObject,
) -> jint {
    api::last_error_code()
}
