use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use tracing::warn;

/// Тип callback-функции для контекста OpenCL
pub type ContextNotifyCallback = Option<
    unsafe extern "C" fn(
        errinfo: *const c_char,
        private_info: *const c_void,
        cb: usize,
        user_data: *mut c_void,
    )
>;

/// Пробрасывает асинхронные сообщения драйвера в лог
pub unsafe extern "C" fn log_context_notify(
    errinfo: *const c_char,
    _private_info: *const c_void,
    _cb: usize,
    _user_data: *mut c_void,
) {
    if errinfo.is_null() {
        return;
    }
    // SAFETY: драйвер передает строку с завершающим нулем, живую на время вызова
    let message = unsafe { CStr::from_ptr(errinfo) };
    warn!("OpenCL context notification: {}", message.to_string_lossy());
}
