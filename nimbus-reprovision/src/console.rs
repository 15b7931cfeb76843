//! Operator-facing output. Every line is mirrored to the text log through
//! `tracing` under the `nimbus_console` target, which the stderr layer mutes.

pub const TARGET: &str = "nimbus_console";

pub fn header(title: &str) {
    println!();
    println!("━━━ {} ━━━", title);
    tracing::info!(target: TARGET, "=== {} ===", title);
}

pub fn step(msg: &str) {
    println!("🔄 {}", msg);
    tracing::info!(target: TARGET, "{}", msg);
}

pub fn info(msg: &str) {
    println!("ℹ️  {}", msg);
    tracing::info!(target: TARGET, "{}", msg);
}

pub fn success(msg: &str) {
    println!("✅ {}", msg);
    tracing::info!(target: TARGET, "OK {}", msg);
}

pub fn warn(msg: &str) {
    println!("⚠️  {}", msg);
    tracing::warn!(target: TARGET, "{}", msg);
}

pub fn error(msg: &str) {
    eprintln!("❌ {}", msg);
    tracing::error!(target: TARGET, "{}", msg);
}

pub fn detail(msg: &str) {
    println!("   {}", msg);
    tracing::debug!(target: TARGET, "  {}", msg);
}

/// Key/value panel used for the plan and the final summary.
pub fn panel(title: &str, rows: &[(String, String)]) {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    println!();
    println!("┌─ {}", title);
    for (k, v) in rows {
        println!("│ {:width$}  {}", k, v, width = width);
        tracing::info!(target: TARGET, "{}: {}", k, v);
    }
    println!("└─");
}
