pub mod graph;
pub mod sync;
pub mod version;

use miette::{IntoDiagnostic, Result};
use serde::Serialize;

/// Error payload of a failed command in JSON mode.
#[derive(Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
struct Failure<'a> {
    ok: bool,
    command: &'a str,
    error: ErrorInfo,
}

/// Report a core error and fail.
///
/// JSON mode prints `{"ok": false, "error": {...}}` to stdout and exits 1;
/// otherwise the error is returned for miette to render.
pub fn fail(command: &str, err: kpm_core::Error, json: bool) -> Result<()> {
    if json {
        let failure = Failure {
            ok: false,
            command,
            error: ErrorInfo {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        };
        print_json(&failure)?;
        std::process::exit(1);
    }
    Err(err).into_diagnostic()
}

/// Pretty-print a JSON document to stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{text}");
    Ok(())
}
