use std::ffi::CString;
use std::io;
use std::thread::JoinHandle;

/// Spawns a named actor thread.
pub fn spawn<F>(name: &str, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let owned = name.to_owned();

    std::thread::Builder::new()
        .name(owned.clone())
        .spawn(move || {
            tracing::debug!(thread = owned, "started");
            f();
        })
}

/// Names the calling thread. Used for threads we do not spawn ourselves,
/// such as the audio device callback.
pub fn set_name(name: &str) {
    let Ok(name) = CString::new(name) else {
        return;
    };

    // linux limits thread names to 15 bytes plus nul
    let bytes = name.as_bytes_with_nul();
    let truncated;
    let name = if bytes.len() > 16 {
        let mut short = bytes[..15].to_vec();
        short.push(0);
        truncated = CString::from_vec_with_nul(short).unwrap_or_default();
        truncated.as_c_str()
    } else {
        name.as_c_str()
    };

    unsafe {
        libc::pthread_setname_np(libc::pthread_self(), name.as_ptr());
    }
}

/// Best effort switch of the calling thread to real time scheduling.
pub fn set_realtime_priority() {
    let param = libc::sched_param { sched_priority: 99 };

    let rc = unsafe {
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };

    if rc != 0 {
        tracing::debug!(
            error = %io::Error::from_raw_os_error(rc),
            "could not set realtime priority",
        );
    }
}
