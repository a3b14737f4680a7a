//! Service-worker entry point. Built for `wasm32` and loaded as the app's
//! service-worker script.

#[cfg(target_arch = "wasm32")]
fn start() {
    if let Err(e) = best_word::service_worker::register() {
        log::error!(
            "Offline layer failed to start: {}",
            best_word::web::js_error_text(&e)
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn start() {
    eprintln!("the offline layer only runs as a browser service worker");
}

fn main() {
    // Set the panic hook to log detailed errors to the console
    console_error_panic_hook::set_once();
    start();
}
