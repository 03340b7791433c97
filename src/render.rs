//! Plain-text rendering for terminal output.

use crate::api::{CatalogStats, Movie, Pagination, UsageStats};
use crate::csvcheck::ValidationReport;
use crate::dashboard::Snapshot;
use crate::keys::KeyRing;
use base64::Engine;
use std::fmt::Write;

const BAR_WIDTH: u64 = 40;
const TITLE_WIDTH: usize = 40;

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn movie_table(movies: &[Movie]) -> String {
    if movies.is_empty() {
        return "No movies found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6}  {:<w$}  {:>4}  {:>6}  GENRES",
        "ID",
        "TITLE",
        "YEAR",
        "RATING",
        w = TITLE_WIDTH
    );
    for movie in movies {
        let _ = writeln!(
            out,
            "{:>6}  {:<w$}  {:>4}  {:>6}  {}",
            movie.id,
            truncate(&movie.title, TITLE_WIDTH),
            or_dash(movie.year),
            or_dash(movie.rating.map(|r| format!("{:.1}", r))),
            movie.genres.join(", "),
            w = TITLE_WIDTH
        );
    }
    out
}

pub fn page_line(info: &Pagination) -> String {
    format!("Page {} of {} ({} movies)", info.page, info.pages, info.total)
}

pub fn movie_detail(movie: &Movie) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#{} {}", movie.id, movie.title);
    let _ = writeln!(out, "  Year:     {}", or_dash(movie.year));
    let _ = writeln!(
        out,
        "  Runtime:  {}",
        or_dash(movie.runtime.map(|r| format!("{} min", r)))
    );
    let _ = writeln!(
        out,
        "  Rating:   {}",
        or_dash(movie.rating.map(|r| format!("{:.1}/10", r)))
    );
    let _ = writeln!(out, "  Director: {}", or_dash(movie.director.as_deref()));
    let _ = writeln!(out, "  Genres:   {}", movie.genres.join(", "));
    if !movie.cast.is_empty() {
        let _ = writeln!(out, "  Cast:     {}", movie.cast.join(", "));
    }
    if let Some(poster) = &movie.poster_url {
        let _ = writeln!(out, "  Poster:   {}", poster);
    }
    if let Some(plot) = &movie.plot {
        let _ = writeln!(out, "\n  {}", plot);
    }
    out
}

pub fn keys_table(ring: &KeyRing, active: Option<&str>) -> String {
    if ring.keys().is_empty() {
        return "No API keys. Create one with `keys new`.\n".to_string();
    }
    let mut out = String::new();
    for key in ring.keys() {
        let marker = if active == Some(key.value.as_str()) {
            "*"
        } else {
            " "
        };
        let origin = if key.is_authoritative() {
            ""
        } else {
            "  [local, not confirmed by backend]"
        };
        let _ = writeln!(
            out,
            "{} {:<10} {:<12} {}  created {}{}",
            marker,
            key.id,
            key.name,
            ring.display_value(key),
            key.created_at.format("%Y-%m-%d %H:%M"),
            origin
        );
    }
    out
}

/// Usage totals plus one bar per hour.
pub fn usage(stats: &UsageStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total requests:      {}", stats.total_requests);
    let _ = writeln!(out, "This month:          {}", stats.this_month_requests);
    let _ = writeln!(out, "API keys:            {}", stats.api_key_count);
    if stats.chart_data.is_empty() {
        return out;
    }

    let peak = stats
        .chart_data
        .iter()
        .map(|h| h.requests)
        .max()
        .unwrap_or(0)
        .max(1);
    let _ = writeln!(out, "\nRequests by hour:");
    for hour in &stats.chart_data {
        let len = (hour.requests * BAR_WIDTH).div_ceil(peak) as usize;
        let _ = writeln!(
            out,
            "  {:02}h {:<w$} {}",
            hour.hour,
            "█".repeat(len),
            hour.requests,
            w = BAR_WIDTH as usize
        );
    }
    out
}

pub fn snapshot(snapshot: &Snapshot) -> String {
    match snapshot {
        Snapshot::Live {
            stats, fetched_at, ..
        } => format!(
            "Dashboard (live, {})\n{}",
            fetched_at.format("%H:%M:%S"),
            usage(stats)
        ),
        Snapshot::Synthetic {
            stats,
            reason,
            fetched_at,
        } => format!(
            "Dashboard (SYNTHETIC DEMO DATA, {}): backend unavailable: {}\n{}",
            fetched_at.format("%H:%M:%S"),
            reason,
            usage(stats)
        ),
        Snapshot::Failed {
            error,
            consecutive_failures,
            retry_in,
        } => {
            let mut out = format!("Dashboard unavailable: {}\n", error);
            if let Some(delay) = retry_in {
                let _ = writeln!(
                    out,
                    "  {} consecutive failure(s), retrying in {}s",
                    consecutive_failures,
                    delay.as_secs_f64().ceil() as u64
                );
            }
            out
        }
    }
}

pub fn catalog_stats(stats: &CatalogStats) -> String {
    let range = match (stats.year_range.min, stats.year_range.max) {
        (Some(min), Some(max)) => format!("{}-{}", min, max),
        _ => "-".to_string(),
    };
    format!(
        "Movies: {}\nGenres: {}\nCast members: {}\nYears: {}\n",
        stats.movies_total, stats.genres_total, stats.cast_total, range
    )
}

pub fn validation_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    let verdict = if report.is_valid() {
        "Validation passed"
    } else {
        "Validation failed"
    };
    let _ = writeln!(out, "{}: {}", verdict, report.summary());
    if report.total_rows > 0 {
        let _ = writeln!(
            out,
            "  rows: {} total, {} valid, {} invalid",
            report.total_rows,
            report.valid_rows,
            report.invalid_rows()
        );
    }
    for error in &report.errors {
        let _ = writeln!(out, "  - {}", error);
    }
    out
}

/// OSC 52 escape that asks the terminal to put `value` on the clipboard.
pub fn osc52(value: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
    format!("\x1b]52;c;{}\x07", encoded)
}
