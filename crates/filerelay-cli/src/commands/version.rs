/// Execute the `version` command.
pub fn execute() {
    println!("filerelay {}", env!("CARGO_PKG_VERSION"));
}
