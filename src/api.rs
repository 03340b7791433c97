//! HTTP client for the movie-data backend.
//!
//! The backend is an external collaborator; this module only mirrors the call
//! shapes it exposes. Every request carries the active key in `X-API-Key`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("access denied ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ApiError {
    /// The backend could not be reached at all, as opposed to refusing.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub plot: Option<String>,
    #[serde(default, deserialize_with = "names")]
    pub genres: Vec<String>,
    #[serde(default, deserialize_with = "names")]
    pub cast: Vec<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameEntry {
    Plain(String),
    Credited { name: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Names {
    Joined(String),
    List(Vec<NameEntry>),
}

/// Genres and cast arrive as "a, b" / "a|b" strings, string lists, or
/// `{name, role}` objects depending on the endpoint.
fn names<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let names = match Option::<Names>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Names::Joined(joined)) => joined
            .split([',', '|'])
            .map(|s| s.trim().to_string())
            .collect(),
        Some(Names::List(entries)) => entries
            .into_iter()
            .map(|entry| match entry {
                NameEntry::Plain(name) | NameEntry::Credited { name } => name.trim().to_string(),
            })
            .collect(),
    };
    Ok(names.into_iter().filter(|n| !n.is_empty()).collect())
}

/// Backend ids are integers today, but the client treats them as opaque.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieQuery {
    pub page: u32,
    pub limit: u32,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub search: Option<String>,
}

impl MovieQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            genre: None,
            year: None,
            search: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieList {
    #[serde(default)]
    pub movies: Vec<Movie>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    /// Older deployments send a bare count instead of a pagination block
    #[serde(default)]
    pub count: Option<u64>,
}

impl MovieList {
    /// Pagination for the page that was asked for, derived from `count` when
    /// the backend omits the block.
    pub fn page_info(&self, query: &MovieQuery) -> Pagination {
        if let Some(pagination) = self.pagination {
            return pagination;
        }
        let total = self.count.unwrap_or(self.movies.len() as u64);
        let limit = query.limit.max(1);
        let pages = total.div_ceil(u64::from(limit)).max(1);
        Pagination {
            page: query.page,
            limit,
            total,
            pages: u32::try_from(pages).unwrap_or(u32::MAX),
        }
    }
}

/// Partial update for `PUT /admin/movies/{id}`; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovieUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl MovieUpdate {
    pub fn is_empty(&self) -> bool {
        *self == MovieUpdate::default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub movies: Vec<Movie>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct YearRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogStats {
    #[serde(default)]
    pub movies_total: u64,
    #[serde(default)]
    pub genres_total: u64,
    #[serde(default)]
    pub cast_total: u64,
    #[serde(default)]
    pub year_range: YearRange,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadReport {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub user: User,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignupResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyUsage {
    pub hour: u8,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub this_month_requests: u64,
    #[serde(default)]
    pub api_key_count: u64,
    #[serde(default)]
    pub chart_data: Vec<HourlyUsage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiKeyRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardResponse {
    #[serde(default)]
    pub stats: UsageStats,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CreatedKey {
    pub api_key: String,
}

#[derive(Deserialize)]
struct MovieEnvelope {
    movie: Movie,
}

#[derive(Deserialize)]
struct GenresEnvelope {
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Deserialize)]
struct YearsEnvelope {
    #[serde(default)]
    years: Vec<i32>,
}

/// Trait for backend clients to allow mocking and abstraction
pub trait MovieApi {
    fn list_movies(&self, query: &MovieQuery) -> Result<MovieList, ApiError>;
    fn get_movie(&self, id: i64) -> Result<Movie, ApiError>;
    fn update_movie(&self, id: i64, update: &MovieUpdate) -> Result<Message, ApiError>;
    fn delete_movie(&self, id: i64) -> Result<Message, ApiError>;
    fn upload_csv(&self, file_name: &str, content: &[u8]) -> Result<UploadReport, ApiError>;
    fn genres(&self) -> Result<Vec<String>, ApiError>;
    fn years(&self) -> Result<Vec<i32>, ApiError>;
    fn search(&self, q: &str) -> Result<SearchResult, ApiError>;
    fn stats(&self) -> Result<CatalogStats, ApiError>;
    fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;
    fn signup(&self, request: &SignupRequest) -> Result<SignupResponse, ApiError>;
    fn dashboard(&self, user_id: &str) -> Result<DashboardResponse, ApiError>;
    fn create_api_key(&self, user_id: &str) -> Result<CreatedKey, ApiError>;
    fn delete_api_key(&self, user_id: &str, key_id: &str) -> Result<Message, ApiError>;
    fn delete_account(&self, user_id: &str) -> Result<Message, ApiError>;

    /// Replace the key sent as `X-API-Key` on later requests.
    fn set_api_key(&self, api_key: Option<String>);
    fn api_key(&self) -> Option<String>;
    fn base_url(&self) -> &str;
}

pub struct Client {
    base_url: String,
    api_key: RwLock<Option<String>>,
    agent: ureq::Agent,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: RwLock::new(None),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn request(&self, method: &str, path: &str) -> (String, ureq::Request) {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(method, url = %url, "backend request");
        let mut request = self
            .agent
            .request(method, &url)
            .set("Accept", "application/json");
        if let Some(key) = self.api_key() {
            request = request.set("X-API-Key", &key);
        }
        (url, request)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let (url, request) = self.request("GET", path);
        decode(&url, request.call())
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let (url, request) = self.request(method, path);
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        decode(&url, request.send_json(body))
    }

    fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let (url, request) = self.request("DELETE", path);
        decode(&url, request.call())
    }
}

fn decode<T: DeserializeOwned>(
    url: &str,
    response: Result<ureq::Response, ureq::Error>,
) -> Result<T, ApiError> {
    match response {
        Ok(r) => r.into_json::<T>().map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        }),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            let message = error_message(&body);
            tracing::debug!(url, status = code, %message, "backend rejected request");
            if code == 401 || code == 403 {
                Err(ApiError::Unauthorized {
                    status: code,
                    message,
                })
            } else {
                Err(ApiError::Status {
                    status: code,
                    message,
                })
            }
        }
        Err(e) => Err(ApiError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Pull the `error` field out of a JSON error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from));
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "no error detail".to_string(),
        None => body.trim().to_string(),
    }
}

/// Encode a single file field as `multipart/form-data`.
pub fn multipart_body(boundary: &str, field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let file_name = file_name.replace(['"', '\r', '\n'], "_");
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

impl MovieApi for Client {
    fn list_movies(&self, query: &MovieQuery) -> Result<MovieList, ApiError> {
        let (url, mut request) = self.request("GET", "/api/movies");
        request = request
            .query("page", &query.page.to_string())
            .query("limit", &query.limit.to_string());
        if let Some(genre) = &query.genre {
            request = request.query("genre", genre);
        }
        if let Some(year) = query.year {
            request = request.query("year", &year.to_string());
        }
        if let Some(search) = &query.search {
            request = request.query("search", search);
        }
        decode(&url, request.call())
    }

    fn get_movie(&self, id: i64) -> Result<Movie, ApiError> {
        let envelope: MovieEnvelope = self.get(&format!("/api/movies/{}", id))?;
        Ok(envelope.movie)
    }

    fn update_movie(&self, id: i64, update: &MovieUpdate) -> Result<Message, ApiError> {
        self.send("PUT", &format!("/admin/movies/{}", id), update)
    }

    fn delete_movie(&self, id: i64) -> Result<Message, ApiError> {
        self.delete(&format!("/admin/movies/{}", id))
    }

    fn upload_csv(&self, file_name: &str, content: &[u8]) -> Result<UploadReport, ApiError> {
        let boundary = format!("reel-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, "file", file_name, content);
        let (url, request) = self.request("POST", "/admin/movies/upload-csv");
        let request = request.set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );
        decode(&url, request.send_bytes(&body))
    }

    fn genres(&self) -> Result<Vec<String>, ApiError> {
        let envelope: GenresEnvelope = self.get("/api/genres")?;
        Ok(envelope.genres)
    }

    fn years(&self) -> Result<Vec<i32>, ApiError> {
        let envelope: YearsEnvelope = self.get("/api/years")?;
        Ok(envelope.years)
    }

    fn search(&self, q: &str) -> Result<SearchResult, ApiError> {
        let (url, request) = self.request("GET", "/api/search");
        decode(&url, request.query("q", q).call())
    }

    fn stats(&self) -> Result<CatalogStats, ApiError> {
        self.get("/api/stats")
    }

    fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.send("POST", "/auth/login", request)
    }

    fn signup(&self, request: &SignupRequest) -> Result<SignupResponse, ApiError> {
        self.send("POST", "/auth/signup", request)
    }

    fn dashboard(&self, user_id: &str) -> Result<DashboardResponse, ApiError> {
        self.get(&format!("/auth/dashboard/{}", user_id))
    }

    fn create_api_key(&self, user_id: &str) -> Result<CreatedKey, ApiError> {
        self.send(
            "POST",
            &format!("/auth/api-key/{}", user_id),
            &serde_json::json!({}),
        )
    }

    fn delete_api_key(&self, user_id: &str, key_id: &str) -> Result<Message, ApiError> {
        self.delete(&format!("/auth/api-key/{}/{}", user_id, key_id))
    }

    fn delete_account(&self, user_id: &str) -> Result<Message, ApiError> {
        self.delete(&format!("/auth/account/{}", user_id))
    }

    fn set_api_key(&self, api_key: Option<String>) {
        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) = api_key;
    }

    fn api_key(&self) -> Option<String> {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_names_from_joined_string() {
        let movie: Movie = serde_json::from_str(
            r#"{"id": 3, "title": "Heat", "genres": "Crime, Drama|Thriller", "cast": "Al Pacino,Robert De Niro"}"#,
        )
        .unwrap();
        assert_eq!(movie.genres, vec!["Crime", "Drama", "Thriller"]);
        assert_eq!(movie.cast, vec!["Al Pacino", "Robert De Niro"]);
        assert!(movie.year.is_none());
    }

    #[test]
    fn test_movie_names_from_credited_objects() {
        let movie: Movie = serde_json::from_str(
            r#"{"id": 1, "title": "The Matrix", "year": 1999, "rating": 8.7,
                "genres": ["Action", "Sci-Fi"],
                "cast": [{"name": "Keanu Reeves", "role": "Neo"}, {"name": "Carrie-Anne Moss", "role": null}],
                "poster_url": null}"#,
        )
        .unwrap();
        assert_eq!(movie.genres, vec!["Action", "Sci-Fi"]);
        assert_eq!(movie.cast, vec!["Keanu Reeves", "Carrie-Anne Moss"]);
        assert_eq!(movie.year, Some(1999));
        assert!(movie.poster_url.is_none());
    }

    #[test]
    fn test_movie_null_genres() {
        let movie: Movie = serde_json::from_str(r#"{"id": 2, "genres": null}"#).unwrap();
        assert!(movie.genres.is_empty());
    }

    #[test]
    fn test_page_info_uses_pagination_block() {
        let list: MovieList = serde_json::from_str(
            r#"{"movies": [], "pagination": {"page": 3, "limit": 10, "total": 47, "pages": 5}}"#,
        )
        .unwrap();
        let info = list.page_info(&MovieQuery::page(3, 10));
        assert_eq!(info.pages, 5);
        assert_eq!(info.total, 47);
    }

    #[test]
    fn test_page_info_derives_from_count() {
        let list: MovieList = serde_json::from_str(r#"{"movies": [], "count": 21}"#).unwrap();
        let info = list.page_info(&MovieQuery::page(2, 10));
        assert_eq!(
            info,
            Pagination {
                page: 2,
                limit: 10,
                total: 21,
                pages: 3
            }
        );
    }

    #[test]
    fn test_user_and_key_ids_accept_numbers() {
        let user: User = serde_json::from_str(r#"{"id": 42, "email": "a@b.c"}"#).unwrap();
        assert_eq!(user.id, "42");
        let key: ApiKeyRecord =
            serde_json::from_str(r#"{"id": 9, "api_key": "mk_x", "created_at": null}"#).unwrap();
        assert_eq!(key.id, "9");
        assert!(key.is_active);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error": "Invalid API key"}"#), "Invalid API key");
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
        assert_eq!(error_message(""), "no error detail");
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_body("XYZ", "file", "my\"movies.csv", b"title,year\n");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--XYZ\r\n"));
        assert!(text.contains("name=\"file\"; filename=\"my_movies.csv\""));
        assert!(text.contains("\r\n\r\ntitle,year\n\r\n--XYZ--\r\n"));
    }

    #[test]
    fn test_update_skips_unset_fields() {
        let update = MovieUpdate {
            title: Some("New".to_string()),
            year: Some(2001),
            ..MovieUpdate::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"title": "New", "year": 2001}));
        assert!(MovieUpdate::default().is_empty());
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = Client::new("http://localhost:8000/", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert!(client.api_key().is_none());
        client.set_api_key(Some("mk_a".to_string()));
        assert_eq!(client.api_key().as_deref(), Some("mk_a"));
    }
}
