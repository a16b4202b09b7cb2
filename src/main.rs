fn main() {
    if let Err(e) = icd_coder_lib::run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
