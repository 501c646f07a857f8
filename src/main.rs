fn main() {
    if let Err(err) = trajectory_import::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
