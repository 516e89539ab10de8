use filerelay_engine::ProviderRegistry;

/// Execute the `providers` command: list every built-in provider and its
/// properties.
pub fn execute() {
    print!("{}", ProviderRegistry::builtin().describe());
}
