/// Tracing subscriber setup.
pub mod logging;
/// Timeout and retry wrapper for provider calls.
pub mod retry;
/// TOML configuration (`sheetrag.toml`).
pub mod toml_config;
