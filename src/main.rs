fn main() {
    if let Err(e) = rvc2mqtt_lib::run() {
        eprintln!("rvc2mqtt: {}", e);
        std::process::exit(1);
    }
}
