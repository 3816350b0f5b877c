fn main() {
    if let Err(err) = xlsx_sync::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
