//! Local validation of movie CSV uploads.
//!
//! A file that fails here is never sent to the backend.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REQUIRED_FIELDS: [&str; 4] = ["title", "year", "genre", "runtime"];

pub const VALID_GENRES: [&str; 22] = [
    "Action",
    "Adventure",
    "Animation",
    "Biography",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Family",
    "Fantasy",
    "Film-Noir",
    "History",
    "Horror",
    "Music",
    "Musical",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Sport",
    "Thriller",
    "War",
    "Western",
];

pub const MIN_YEAR: i32 = 1900;
pub const MAX_TITLE_CHARS: usize = 500;
pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 10.0;

static POSTER_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .expect("poster URL pattern compiles")
});

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },
}

/// Read a CSV file as UTF-8 text.
pub fn read_csv(path: &Path) -> Result<String, CsvError> {
    let bytes = std::fs::read(path).map_err(|source| CsvError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| CsvError::Encoding {
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn invalid_rows(&self) -> usize {
        self.total_rows - self.valid_rows
    }

    pub fn summary(&self) -> String {
        if self.total_rows == 0 {
            "No rows found".to_string()
        } else {
            format!("{}/{} rows valid", self.valid_rows, self.total_rows)
        }
    }
}

/// Split CSV text into records. Handles quoted fields, doubled quotes and
/// newlines inside quotes. Blank lines are skipped.
pub fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    let mut finish_record = |record: &mut Vec<String>, field: &mut String| {
        record.push(std::mem::take(field));
        let blank = record.len() == 1 && record[0].trim().is_empty();
        let done = std::mem::take(record);
        if !blank {
            records.push(done);
        }
    };

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => finish_record(&mut record, &mut field),
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        finish_record(&mut record, &mut field);
    }
    records
}

/// One data record viewed through the header row.
struct Row<'a> {
    headers: &'a [String],
    record: &'a [String],
}

impl<'a> Row<'a> {
    /// `None` when the column does not exist, `""` when the record is short.
    fn get(&self, name: &str) -> Option<&'a str> {
        let index = self.headers.iter().position(|h| h == name)?;
        Some(self.record.get(index).map(String::as_str).unwrap_or(""))
    }

    fn present(&self, name: &str) -> Option<&'a str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }
}

pub struct Validator {
    max_year: i32,
}

impl Validator {
    pub fn new(max_year: i32) -> Self {
        Self { max_year }
    }

    pub fn max_year(&self) -> i32 {
        self.max_year
    }

    /// Validator whose upper year bound is the current calendar year.
    pub fn current() -> Self {
        use chrono::Datelike;
        Self::new(chrono::Utc::now().year())
    }

    pub fn validate(&self, text: &str) -> ValidationReport {
        let mut report = ValidationReport::default();
        let text = text.trim_start_matches('\u{feff}');
        if text.trim().is_empty() {
            report.errors.push("CSV file is empty".to_string());
            return report;
        }

        let mut records = parse_records(text).into_iter();
        let headers: Vec<String> = match records.next() {
            Some(headers) => headers.iter().map(|h| h.trim().to_string()).collect(),
            None => {
                report.errors.push("CSV file has no headers".to_string());
                return report;
            }
        };
        self.check_headers(&headers, &mut report);

        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (index, record) in records.enumerate() {
            let row_num = index + 2;
            report.total_rows += 1;
            let row = Row {
                headers: &headers,
                record: &record,
            };
            let mut row_errors = self.check_row(&row);

            if let (Some(title), Some(year)) = (row.get("title"), row.get("year")) {
                let key = (title.trim().to_lowercase(), year.trim().to_string());
                if !seen.insert(key) {
                    row_errors.push(format!("Duplicate movie: {} ({})", title, year));
                }
            }

            if row_errors.is_empty() {
                report.valid_rows += 1;
            } else {
                report
                    .errors
                    .extend(row_errors.into_iter().map(|e| format!("Row {}: {}", row_num, e)));
            }
        }
        report
    }

    fn check_headers(&self, headers: &[String], report: &mut ValidationReport) {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !headers.iter().any(|h| h == field))
            .collect();
        if !missing.is_empty() {
            report
                .errors
                .push(format!("Missing required headers: {}", missing.join(", ")));
        }
        if headers.iter().any(|h| h.is_empty()) {
            report.errors.push("Empty header column found".to_string());
        }
    }

    fn check_row(&self, row: &Row<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        for field in REQUIRED_FIELDS {
            if row.present(field).is_none() {
                errors.push(format!("Required field '{}' is missing or empty", field));
            }
        }

        if let Some(title) = row.present("title") {
            let len = title.chars().count();
            if len > MAX_TITLE_CHARS {
                errors.push(format!(
                    "Title too long (max {} characters): {} characters",
                    MAX_TITLE_CHARS, len
                ));
            }
        }

        if let Some(raw) = row.present("year") {
            match raw.parse::<i32>() {
                Ok(year) if year < MIN_YEAR || year > self.max_year => errors.push(format!(
                    "Year {} out of valid range ({}-{})",
                    year, MIN_YEAR, self.max_year
                )),
                Ok(_) => {}
                Err(_) => errors.push(format!("Invalid year format: '{}'", raw)),
            }
        }

        if let Some(raw) = row.present("runtime") {
            match raw.parse::<i64>() {
                Ok(runtime) if runtime <= 0 => {
                    errors.push(format!("Runtime must be greater than 0: {}", runtime))
                }
                Ok(_) => {}
                Err(_) => errors.push(format!("Invalid runtime format: '{}'", raw)),
            }
        }

        if let Some(raw) = row.present("genre") {
            let genres: Vec<&str> = raw
                .split('|')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .collect();
            let invalid: Vec<&str> = genres
                .iter()
                .copied()
                .filter(|g| !VALID_GENRES.contains(g))
                .collect();
            if !invalid.is_empty() {
                errors.push(format!("Invalid genres: {}", invalid.join(", ")));
            }
            if genres.is_empty() {
                errors.push("At least one valid genre is required".to_string());
            }
        }

        if let Some(raw) = row.present("rating") {
            match raw.parse::<f64>() {
                Ok(rating) if !rating.is_finite() => {
                    errors.push(format!("Invalid rating format: '{}'", raw))
                }
                Ok(rating) if !(MIN_RATING..=MAX_RATING).contains(&rating) => errors.push(
                    format!(
                        "Rating {} out of valid range ({}-{})",
                        rating, MIN_RATING, MAX_RATING
                    ),
                ),
                Ok(_) => {}
                Err(_) => errors.push(format!("Invalid rating format: '{}'", raw)),
            }
        }

        if let Some(url) = row.present("poster_url") {
            if !is_valid_poster_url(url) {
                errors.push(format!("Invalid poster URL format: {}", url));
            }
        }

        errors
    }
}

pub fn is_valid_poster_url(url: &str) -> bool {
    POSTER_URL.is_match(url)
}

pub fn is_valid_genre(genre: &str) -> bool {
    VALID_GENRES.contains(&genre)
}
