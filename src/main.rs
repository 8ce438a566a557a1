//! CLI binary for the lumo backlight daemon.

fn main() {
    env_logger::init();

    if let Err(e) = lumo::run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}
