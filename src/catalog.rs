//! Admin catalog operations over the movie backend.

use crate::api::{
    ApiError, Message, MovieApi, MovieList, MovieQuery, MovieUpdate, Pagination, SearchResult,
    UploadReport,
};
use crate::csvcheck::{self, CsvError, ValidationReport, Validator};
use crate::prompt::Prompt;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub const EDITABLE_FIELDS: [&str; 10] = [
    "title",
    "year",
    "runtime",
    "rating",
    "director",
    "plot",
    "genres",
    "cast",
    "poster_url",
    "external_id",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("page must be 1 or greater")]
    InvalidPage,
    #[error("search query cannot be empty")]
    EmptyQuery,
    #[error("expected field=value, got '{0}'")]
    Malformed(String),
    #[error("unknown field '{field}' (editable: {})", EDITABLE_FIELDS.join(", "))]
    UnknownField { field: String },
    #[error("field '{0}' given more than once")]
    Repeated(String),
    #[error("invalid {field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error("no fields to update")]
    NoChanges,
    #[error(transparent)]
    Csv(#[from] CsvError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Fetch exactly the requested page.
pub fn fetch_page(
    api: &dyn MovieApi,
    query: &MovieQuery,
) -> Result<(MovieList, Pagination), CatalogError> {
    if query.page == 0 {
        return Err(CatalogError::InvalidPage);
    }
    let list = api.list_movies(query)?;
    let info = list.page_info(query);
    Ok((list, info))
}

pub fn search(api: &dyn MovieApi, q: &str) -> Result<SearchResult, CatalogError> {
    let q = q.trim();
    if q.is_empty() {
        return Err(CatalogError::EmptyQuery);
    }
    Ok(api.search(q)?)
}

fn invalid(field: &str, message: impl Into<String>) -> CatalogError {
    CatalogError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn split_names(value: &str) -> Vec<String> {
    value
        .split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Build a partial update from `field=value` arguments, checking types and
/// ranges the same way CSV uploads are checked.
pub fn parse_update(pairs: &[String], max_year: i32) -> Result<MovieUpdate, CatalogError> {
    let mut update = MovieUpdate::default();
    let mut seen = HashSet::new();

    for pair in pairs {
        let (field, value) = pair
            .split_once('=')
            .ok_or_else(|| CatalogError::Malformed(pair.clone()))?;
        let field = field.trim();
        let value = value.trim();
        if !EDITABLE_FIELDS.contains(&field) {
            return Err(CatalogError::UnknownField {
                field: field.to_string(),
            });
        }
        if !seen.insert(field.to_string()) {
            return Err(CatalogError::Repeated(field.to_string()));
        }

        match field {
            "title" => {
                let len = value.chars().count();
                if len == 0 || len > csvcheck::MAX_TITLE_CHARS {
                    return Err(invalid(field, "must be 1-500 characters"));
                }
                update.title = Some(value.to_string());
            }
            "year" => {
                let year: i32 = value
                    .parse()
                    .map_err(|_| invalid(field, format!("'{}' is not a number", value)))?;
                if year < csvcheck::MIN_YEAR || year > max_year {
                    return Err(invalid(
                        field,
                        format!("{} out of range ({}-{})", year, csvcheck::MIN_YEAR, max_year),
                    ));
                }
                update.year = Some(year);
            }
            "runtime" => {
                let runtime: u32 = value
                    .parse()
                    .map_err(|_| invalid(field, format!("'{}' is not a positive number", value)))?;
                if runtime == 0 {
                    return Err(invalid(field, "must be greater than 0"));
                }
                update.runtime = Some(runtime);
            }
            "rating" => {
                let rating: f64 = value
                    .parse()
                    .ok()
                    .filter(|r: &f64| r.is_finite())
                    .ok_or_else(|| invalid(field, format!("'{}' is not a number", value)))?;
                if !(csvcheck::MIN_RATING..=csvcheck::MAX_RATING).contains(&rating) {
                    return Err(invalid(field, format!("{} out of range (0-10)", rating)));
                }
                update.rating = Some(rating);
            }
            "genres" => {
                let genres = split_names(value);
                if genres.is_empty() {
                    return Err(invalid(field, "at least one genre is required"));
                }
                let unknown: Vec<&str> = genres
                    .iter()
                    .map(String::as_str)
                    .filter(|g| !csvcheck::is_valid_genre(g))
                    .collect();
                if !unknown.is_empty() {
                    return Err(invalid(field, format!("unknown genres: {}", unknown.join(", "))));
                }
                update.genres = Some(genres);
            }
            "cast" => update.cast = Some(split_names(value)),
            "poster_url" => {
                if !csvcheck::is_valid_poster_url(value) {
                    return Err(invalid(field, format!("'{}' is not an http(s) URL", value)));
                }
                update.poster_url = Some(value.to_string());
            }
            "director" => update.director = Some(value.to_string()),
            "plot" => update.plot = Some(value.to_string()),
            "external_id" => update.external_id = Some(value.to_string()),
            _ => unreachable!("field checked against EDITABLE_FIELDS"),
        }
    }

    if update.is_empty() {
        return Err(CatalogError::NoChanges);
    }
    Ok(update)
}

pub fn edit_movie(
    api: &dyn MovieApi,
    id: i64,
    update: &MovieUpdate,
) -> Result<Message, CatalogError> {
    Ok(api.update_movie(id, update)?)
}

/// Delete after confirmation. `None` when the user declined.
pub fn delete_movie(
    api: &dyn MovieApi,
    id: i64,
    prompt: &dyn Prompt,
) -> Result<Option<Message>, CatalogError> {
    if !prompt.confirm(&format!("Delete movie {}?", id)) {
        return Ok(None);
    }
    Ok(Some(api.delete_movie(id)?))
}

#[derive(Debug)]
pub enum UploadOutcome {
    /// Validation failed; nothing was sent
    Rejected(ValidationReport),
    /// Dry run passed validation; nothing was sent
    Validated(ValidationReport),
    Uploaded {
        validation: ValidationReport,
        response: UploadReport,
    },
}

pub fn upload_csv(
    api: &dyn MovieApi,
    path: &Path,
    dry_run: bool,
    validator: &Validator,
) -> Result<UploadOutcome, CatalogError> {
    let text = csvcheck::read_csv(path)?;
    let report = validator.validate(&text);
    if !report.is_valid() {
        tracing::info!(path = %path.display(), errors = report.errors.len(), "CSV rejected locally");
        return Ok(UploadOutcome::Rejected(report));
    }
    if dry_run {
        return Ok(UploadOutcome::Validated(report));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    let response = api.upload_csv(&file_name, text.as_bytes())?;
    Ok(UploadOutcome::Uploaded {
        validation: report,
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::prompt::scripted::ScriptedPrompt;
    use std::io::Write;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fetch_page_requests_exact_page() {
        let api = FakeApi::with_movies(47);
        let (list, info) = fetch_page(&api, &MovieQuery::page(3, 10)).unwrap();
        assert_eq!(api.calls(), vec!["list_movies page=3 limit=10".to_string()]);
        assert_eq!(list.movies.len(), 10);
        assert_eq!(list.movies[0].id, 21);
        assert_eq!((info.page, info.pages, info.total), (3, 5, 47));
    }

    #[test]
    fn test_fetch_last_partial_page_from_count() {
        let api = FakeApi {
            send_count_only: true,
            ..FakeApi::with_movies(21)
        };
        let (list, info) = fetch_page(&api, &MovieQuery::page(3, 10)).unwrap();
        assert_eq!(list.movies.len(), 1);
        assert_eq!(info.pages, 3);
    }

    #[test]
    fn test_page_zero_rejected() {
        let api = FakeApi::with_movies(3);
        assert!(matches!(
            fetch_page(&api, &MovieQuery::page(0, 10)),
            Err(CatalogError::InvalidPage)
        ));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_empty_search_not_sent() {
        let api = FakeApi::with_movies(3);
        assert!(matches!(search(&api, "  "), Err(CatalogError::EmptyQuery)));
        assert!(api.calls().is_empty());
        assert_eq!(search(&api, "movie 2").unwrap().count, 1);
    }

    #[test]
    fn test_parse_update_fields() {
        let update = parse_update(
            &pairs(&[
                "title=The Matrix Reloaded",
                "year=2003",
                "rating=7.2",
                "genres=Action|Sci-Fi",
                "cast=Keanu Reeves, Carrie-Anne Moss",
            ]),
            2026,
        )
        .unwrap();
        assert_eq!(update.title.as_deref(), Some("The Matrix Reloaded"));
        assert_eq!(update.year, Some(2003));
        assert_eq!(update.rating, Some(7.2));
        assert_eq!(
            update.genres,
            Some(vec!["Action".to_string(), "Sci-Fi".to_string()])
        );
        assert_eq!(update.cast.as_ref().map(Vec::len), Some(2));
        assert!(update.runtime.is_none());
    }

    #[test]
    fn test_parse_update_rejects_bad_values() {
        let cases = [
            ("year=1850", "year"),
            ("runtime=0", "runtime"),
            ("runtime=-5", "runtime"),
            ("rating=11", "rating"),
            ("rating=NaN", "rating"),
            ("genres=Cartoon", "genres"),
            ("poster_url=ftp://x.org/a.png", "poster_url"),
            ("title=", "title"),
        ];
        for (input, expected_field) in cases {
            match parse_update(&pairs(&[input]), 2026) {
                Err(CatalogError::InvalidValue { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("{} gave {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_parse_update_structure_errors() {
        assert!(matches!(
            parse_update(&pairs(&["budget=1"]), 2026),
            Err(CatalogError::UnknownField { .. })
        ));
        assert!(matches!(
            parse_update(&pairs(&["title"]), 2026),
            Err(CatalogError::Malformed(_))
        ));
        assert!(matches!(
            parse_update(&pairs(&["year=2000", "year=2001"]), 2026),
            Err(CatalogError::Repeated(_))
        ));
        assert!(matches!(parse_update(&[], 2026), Err(CatalogError::NoChanges)));
    }

    #[test]
    fn test_edit_sends_only_given_fields() {
        let api = FakeApi::with_movies(1);
        let update = parse_update(&pairs(&["runtime=136"]), 2026).unwrap();
        edit_movie(&api, 1, &update).unwrap();
        assert_eq!(api.calls(), vec![r#"update_movie 1 {"runtime":136}"#.to_string()]);
    }

    #[test]
    fn test_delete_requires_confirmation() {
        let api = FakeApi::with_movies(2);
        assert!(delete_movie(&api, 2, &ScriptedPrompt::no()).unwrap().is_none());
        assert!(api.calls().is_empty());

        let prompt = ScriptedPrompt::yes();
        assert!(delete_movie(&api, 2, &prompt).unwrap().is_some());
        assert_eq!(api.calls(), vec!["delete_movie 2".to_string()]);
        assert_eq!(*prompt.asked.borrow(), vec!["Delete movie 2?".to_string()]);
    }

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_invalid_csv_never_uploaded() {
        let api = FakeApi::default();
        let file = csv_file("title,year,genre,runtime\nHeat,1895,Crime,170\n");
        let outcome = upload_csv(&api, file.path(), false, &Validator::new(2026)).unwrap();
        assert!(matches!(outcome, UploadOutcome::Rejected(ref r) if r.errors.len() == 1));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_dry_run_stops_after_validation() {
        let api = FakeApi::default();
        let file = csv_file("title,year,genre,runtime\nHeat,1995,Crime,170\n");
        let outcome = upload_csv(&api, file.path(), true, &Validator::new(2026)).unwrap();
        assert!(matches!(outcome, UploadOutcome::Validated(_)));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_valid_csv_is_uploaded() {
        let api = FakeApi::default();
        let content = "title,year,genre,runtime\nHeat,1995,Crime,170\n";
        let file = csv_file(content);
        let outcome = upload_csv(&api, file.path(), false, &Validator::new(2026)).unwrap();
        let UploadOutcome::Uploaded { response, .. } = outcome else {
            panic!("expected upload");
        };
        assert_eq!(response.inserted, 1);
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(
            api.calls(),
            vec![format!("upload_csv {} {}", name, content.len())]
        );
    }
}
