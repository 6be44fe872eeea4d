//! JSON output on stdout.

use serde::Serialize;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse an optional JSON argument.
pub(crate) fn parse_json_arg(
    name: &str,
    raw: Option<&str>,
) -> Result<Option<serde_json::Value>, Box<dyn std::error::Error>> {
    raw.map(|raw| {
        serde_json::from_str(raw).map_err(|e| format!("--{} is not valid JSON: {}", name, e).into())
    })
    .transpose()
}
