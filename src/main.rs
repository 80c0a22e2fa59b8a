fn main() {
    if let Err(e) = sifra::cli::main() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
