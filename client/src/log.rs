//! Console logging that also works in native test builds.

#[cfg(target_arch = "wasm32")]
pub fn info(message: &str) {
    web_sys::console::info_1(&message.into());
}

#[cfg(target_arch = "wasm32")]
pub fn warn(message: &str) {
    web_sys::console::warn_1(&message.into());
}

#[cfg(not(target_arch = "wasm32"))]
pub fn info(message: &str) {
    eprintln!("[info] {message}");
}

#[cfg(not(target_arch = "wasm32"))]
pub fn warn(message: &str) {
    eprintln!("[warn] {message}");
}
