fn main() {
    if let Err(err) = shelf_sync::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
