use std::ffi::CStr;
use std::path::Path;

/// `<user@host:path> ` with `path` shown relative to `home` when inside it.
pub fn render(home: &Path, cwd: &Path) -> String {
    format!("<{}@{}:{}> ", user_name(), host_name(), display_path(home, cwd))
}

/// `~` for the home itself, `~/rest` below it, otherwise the absolute path.
pub fn display_path(home: &Path, cwd: &Path) -> String {
    match cwd.strip_prefix(home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Ok(rest) => format!("~/{}", rest.display()),
        Err(_) => cwd.display().to_string(),
    }
}

fn user_name() -> String {
    // SAFETY: getpwuid returns a pointer into static storage or null; the name
    // is copied out before any other passwd call can overwrite it.
    let name = unsafe {
        let entry = libc::getpwuid(libc::getuid());
        if entry.is_null() || (*entry).pw_name.is_null() {
            None
        } else {
            Some(CStr::from_ptr((*entry).pw_name).to_string_lossy().into_owned())
        }
    };
    name.or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "user".to_string())
}

fn host_name() -> String {
    let mut buf = [0 as libc::c_char; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len() - 1) };
    if rc != 0 {
        return "localhost".to_string();
    }
    // SAFETY: the last byte was never written, so the buffer is NUL terminated.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}
