//! Path templating for file-shaped destinations (spec.md §4.8).
//!
//! Resolves `${yyyy}`, `${MM}`, `${dd}`, `${HH}`, `${mm}`, `${ss}` against
//! the batch's flush UTC timestamp. Anything else in the template string
//! passes through unchanged.

use chrono::{DateTime, Utc};

pub fn resolve(template: &str, flushed_at: DateTime<Utc>) -> String {
    template
        .replace("${yyyy}", &format!("{:04}", flushed_at.format("%Y")))
        .replace("${MM}", &flushed_at.format("%m").to_string())
        .replace("${dd}", &flushed_at.format("%d").to_string())
        .replace("${HH}", &flushed_at.format("%H").to_string())
        .replace("${mm}", &flushed_at.format("%M").to_string())
        .replace("${ss}", &flushed_at.format("%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn resolves_all_known_variables() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let resolved = resolve("logs/${yyyy}/${MM}/${dd}/${HH}${mm}${ss}.jsonl.gz", ts);
        assert_eq!(resolved, "logs/2024/03/07/090502.jsonl.gz");
    }

    #[test]
    fn passes_through_unknown_text() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(resolve("static/path.jsonl", ts), "static/path.jsonl");
    }
}
