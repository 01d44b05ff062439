use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tsuite_core::atomic_write_bytes;

/// Terminal state counts of one run, plus the paths behind them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub skipped: usize,
    pub ignored: usize,
    /// `(path, reason)` of every failing test, sorted by path.
    pub failing: Vec<(String, String)>,
    pub skipped_paths: Vec<String>,
    pub ignored_paths: Vec<String>,
}

impl Tally {
    pub fn completed(&self) -> usize {
        self.passed + self.failed
    }

    pub fn completed_with_skipped(&self) -> usize {
        self.completed() + self.skipped
    }
}

/// Percentage of `passed` in `total`, at most two decimals. `?` when there is
/// nothing to measure; never `100` while something failed.
pub fn format_percent(passed: usize, total: usize, failed: usize) -> String {
    if (total == 0 || passed == 0) && failed == 0 {
        return "?".to_string();
    }
    let percent = if total == 0 {
        0.0
    } else {
        passed as f64 * 100.0 / total as f64
    };
    let formatted = format!("{:.2}", percent);
    let formatted = formatted.trim_end_matches('0').trim_end_matches('.').to_string();
    if formatted == "100" && failed > 0 {
        "99.99".to_string()
    } else {
        formatted
    }
}

pub fn format_runtime(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    let minutes = millis / 60_000;
    let seconds = (millis % 60_000) / 1000;
    format!("{}m {}s {}ms", minutes, seconds, millis % 1000)
}

pub fn summary_lines(tally: &Tally, elapsed: Duration) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "== SUMMARY ==".to_string(),
        format!("Runtime: {}", format_runtime(elapsed)),
        format!(
            "Excluding skipped: {}% ({}/{}) passed",
            format_percent(tally.passed, tally.completed(), tally.failed),
            tally.passed,
            tally.completed()
        ),
        format!(
            "Including skipped: {}% ({}/{}) passed",
            format_percent(tally.passed, tally.completed_with_skipped(), tally.failed),
            tally.passed,
            tally.completed_with_skipped()
        ),
    ];
    if tally.timeouts > 0 {
        lines.push(format!("Timeouts:          {}", tally.timeouts));
    }
    if tally.ignored > 0 {
        lines.push(format!("Ignored tests:     {}", tally.ignored));
    }
    lines
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn render_html(description: &str, tests_location: &Path, tally: &Tally, summary: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<html><head><title>{} output</title></head><body>{}<br/><br/>\n",
        escape_html(description),
        Utc::now().to_rfc3339()
    ));
    out.push_str("<h3>Failing Tests</h3>\n<ul>\n");
    for (path, reason) in &tally.failing {
        out.push_str(&format!(
            "<li>FAILED <a href=\"{}\">{}</a> {}</li>\n",
            escape_html(&tests_location.join(path).to_string_lossy()),
            escape_html(path),
            escape_html(reason)
        ));
    }
    out.push_str("</ul>\n");
    for (title, paths) in [
        ("Skipped Tests", &tally.skipped_paths),
        ("Ignored Tests", &tally.ignored_paths),
    ] {
        if paths.is_empty() {
            continue;
        }
        out.push_str(&format!("<h3>{}</h3>\n<ul>\n", title));
        for path in paths {
            out.push_str(&format!("<li>{}</li>\n", escape_html(path)));
        }
        out.push_str("</ul>\n");
    }
    out.push_str(&summary.iter().map(|l| escape_html(l)).collect::<Vec<_>>().join("<br/>"));
    out.push_str("\n</body></html>\n");
    out
}

pub fn write_lines(path: &Path, lines: &[String]) -> std::io::Result<()> {
    let mut text = lines.join("\n");
    text.push('\n');
    atomic_write_bytes(path, text.as_bytes())
}

pub fn write_html(path: &Path, html: &str) -> std::io::Result<()> {
    atomic_write_bytes(path, html.as_bytes())
}

pub fn delete_previous(paths: &[&Path]) -> std::io::Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_unknown_without_results() {
        assert_eq!(format_percent(0, 0, 0), "?");
        assert_eq!(format_percent(0, 5, 0), "?");
        assert_eq!(format_percent(0, 3, 3), "0");
    }

    #[test]
    fn percent_uses_at_most_two_decimals() {
        assert_eq!(format_percent(1, 3, 2), "33.33");
        assert_eq!(format_percent(1, 8, 7), "12.5");
        assert_eq!(format_percent(10, 10, 0), "100");
    }

    /// The clamp only applies when rounding would print `100`; an exact 99
    /// stays `99` rather than being raised to `99.99`.
    #[test]
    fn clamp_does_not_touch_values_that_do_not_round_to_hundred() {
        assert_eq!(format_percent(99, 100, 1), "99");
        assert_eq!(format_percent(9_990, 10_000, 10), "99.9");
    }

    #[test]
    fn rounded_hundred_with_failures_is_clamped() {
        assert_eq!(format_percent(99_999, 100_000, 1), "99.99");
        assert_eq!(format_percent(199_999, 200_000, 1), "99.99");
    }

    #[test]
    fn runtime_is_split_into_minutes_seconds_and_millis() {
        assert_eq!(format_runtime(Duration::from_millis(185_042)), "3m 5s 42ms");
        assert_eq!(format_runtime(Duration::ZERO), "0m 0s 0ms");
    }

    #[test]
    fn summary_and_html_list_failures() {
        let tally = Tally {
            passed: 2,
            failed: 1,
            skipped: 1,
            ignored: 1,
            failing: vec![("c.js".to_string(), "Error: <bad>".to_string())],
            skipped_paths: vec!["s.js".to_string()],
            ignored_paths: vec!["i.js".to_string()],
            ..Tally::default()
        };
        let summary = summary_lines(&tally, Duration::from_millis(10));
        assert!(summary.contains(&"Excluding skipped: 66.67% (2/3) passed".to_string()));
        assert!(summary.contains(&"Including skipped: 50% (2/4) passed".to_string()));
        assert!(summary.contains(&"Ignored tests:     1".to_string()));

        let html = render_html("suite", Path::new("/t"), &tally, &summary);
        assert!(html.contains("<h3>Failing Tests</h3>"));
        assert!(html.contains("Error: &lt;bad&gt;"));
        assert!(html.contains("<li>s.js</li>"));
        assert!(html.contains("<h3>Ignored Tests</h3>"));
    }
}
