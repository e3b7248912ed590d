use super::print_json;
use kpm_core::version::{version_string, REPOSITORY_SCHEMA_VERSION};
use kpm_core::VERSION;
use miette::Result;

pub fn run(json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "ok": true,
            "version": VERSION,
            "repository_schema_version": REPOSITORY_SCHEMA_VERSION,
        }));
    }
    println!("{}", version_string());
    Ok(())
}
