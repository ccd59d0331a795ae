use anyhow::Result;
use serde_json::Value;

/// Pretty-prints a JSON response body, the same `serde_json::to_string_pretty`
/// rendering the teacher's `status`/`graph` commands use for server replies.
pub fn print_json(body: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

/// Summarizes `/status`'s body above the full JSON dump, mirroring the
/// teacher's `status` command printing a few headline fields before the
/// raw payload.
pub fn print_status_summary(body: &Value) {
    if let Some(types) = body.get("registeredTypes").and_then(|v| v.as_array()) {
        let names: Vec<&str> = types.iter().filter_map(|t| t.as_str()).collect();
        println!("Registered types: {}", names.join(", "));
    }
    if let Some(planes) = body.get("registeredPlanes").and_then(|v| v.as_array()) {
        let names: Vec<&str> = planes.iter().filter_map(|p| p.as_str()).collect();
        println!("Registered planes: {}", names.join(", "));
    }
    if let Some(count) = body.get("deadLetterCount").and_then(|v| v.as_u64()) {
        println!("Dead letters: {}", count);
    }
}
