use regex::Regex;
use std::sync::OnceLock;

fn timestamp_regex() -> &'static Regex {
    static TIMESTAMP: OnceLock<Regex> = OnceLock::new();
    TIMESTAMP.get_or_init(|| {
        Regex::new(r"^(?:(?:(\d+):)?(\d{1,2}):)?(\d+)$").expect("timestamp regex is valid")
    })
}

/// Formatea milisegundos como `MM:SS` o `H:MM:SS`
pub fn format_duration(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Interpreta `SS`, `MM:SS` o `H:MM:SS` y devuelve milisegundos
pub fn parse_timestamp(input: &str) -> Option<u64> {
    let caps = timestamp_regex().captures(input.trim())?;
    let field = |index: usize| -> Option<u64> {
        caps.get(index)
            .map(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(Some(0))
    };

    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;

    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    total.checked_mul(1000)
}
