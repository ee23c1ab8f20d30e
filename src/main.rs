fn main() {
    match nib::run::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            println!("nib: error: {}", err);
            std::process::exit(1);
        }
    }
}
