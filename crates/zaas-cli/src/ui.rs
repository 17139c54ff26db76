use colored::Colorize;

fn prefix() -> String {
    "[zaas]".bold().cyan().to_string()
}

/// Print a success message: [zaas] message (in green)
pub fn success(msg: &str) {
    println!("{} {}", prefix(), msg.green());
}

/// Print a warning message: [zaas] message (in yellow)
pub fn warn(msg: &str) {
    println!("{} {}", prefix(), msg.yellow());
}

pub fn status_header() {
    println!("{}", "zaas-bootstrap status".bold());
    println!("{}", "---------------------".dimmed());
}

/// Print a status line with a bold label and a colored value.
pub fn status_line(label: &str, value: &str) {
    let colored_value = match value {
        "registered" => value.green().to_string(),
        "awaiting token" | "identified" | "pending" => value.yellow().to_string(),
        "unprovisioned" | "-" => value.dimmed().to_string(),
        _ => value.to_string(),
    };
    println!("{} {}", format!("{:<20}", label).bold(), colored_value);
}
