//! Google Sheets backend.
//!
//! API calls are slow and rate limited, so reads are served from a bulk
//! snapshot of the worksheet that is refetched once it is older than the TTL.
//! Writes go straight to the sheet and then patch the snapshot.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::schema::{self, StatusRow, HEADERS};
use super::{StateStore, StoreError};
use crate::models::{Status, StatusKey, StatusRecord};
use crate::utils::now_local;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_token_uri() -> String { "https://oauth2.googleapis.com/token".into() }

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

pub enum SheetsAuth {
    /// Bearer token obtained elsewhere, used as is.
    Token(String),
    ServiceAccount {
        key: ServiceAccountKey,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl SheetsAuth {
    pub fn token(token: String) -> Self {
        SheetsAuth::Token(token)
    }

    pub async fn from_key_file(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read(path).await?;
        let key: ServiceAccountKey = serde_json::from_slice(&raw)?;
        Ok(SheetsAuth::ServiceAccount { key, cached: Mutex::new(None) })
    }

    async fn bearer(&self, http: &reqwest::Client) -> Result<String, StoreError> {
        let (key, cached) = match self {
            SheetsAuth::Token(token) => return Ok(token.clone()),
            SheetsAuth::ServiceAccount { key, cached } => (key, cached),
        };

        let mut cached = cached.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let issued = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: SHEETS_SCOPE,
            aud: &key.token_uri,
            iat: issued,
            exp: issued + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("invalid service account key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| StoreError::Auth(format!("could not sign token request: {}", e)))?;

        let response = http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token exchange returned {}: {}", status, body)));
        }
        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        Ok(token.access_token)
    }
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    updates: Option<UpdateSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSummary {
    updated_range: Option<String>,
}

/// A1 range on `worksheet`, quoted so titles with spaces or quotes work.
fn a1_range(worksheet: &str, cells: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cells)
}

/// First row number of an A1 range such as `'Status'!A7:I7`.
fn first_row_of(range: &str) -> Option<usize> {
    let cells = range.rsplit('!').next()?;
    let digits: String = cells
        .chars()
        .skip_while(|c| c.is_ascii_alphabetic())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

struct SheetsClient {
    http: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    worksheet: String,
    auth: SheetsAuth,
}

impl SheetsClient {
    fn url(&self, tail: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.api_base).map_err(|e| StoreError::Schema(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Schema("sheets endpoint cannot take a path".into()))?;
            if let Some((first, rest)) = tail.split_first() {
                segments.push(&format!("{}{}", self.spreadsheet_id, first));
                segments.extend(rest);
            } else {
                segments.push(&self.spreadsheet_id);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let token = self.auth.bearer(&self.http).await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StoreError::Auth(format!("{}: {}", status, body)))
            }
            _ => Err(StoreError::Unavailable(format!("{}: {}", status, body))),
        }
    }

    async fn worksheet_titles(&self) -> Result<Vec<String>, StoreError> {
        let url = self.url(&[""])?;
        let meta: SpreadsheetMeta = self
            .send(self.http.get(url).query(&[("fields", "sheets.properties.title")]))
            .await?
            .json()
            .await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn add_worksheet(&self) -> Result<(), StoreError> {
        let url = self.url(&[":batchUpdate"])?;
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": self.worksheet,
                        "gridProperties": { "rowCount": 1000, "columnCount": HEADERS.len() }
                    }
                }
            }]
        });
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, StoreError> {
        let range = a1_range(&self.worksheet, "A:I");
        let url = self.url(&["", "values", &range])?;
        let values: ValueRange = self.send(self.http.get(url)).await?.json().await?;
        Ok(values
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn write_row(&self, row_number: usize, cells: Vec<String>) -> Result<(), StoreError> {
        let range = a1_range(&self.worksheet, &format!("A{0}:I{0}", row_number));
        let url = self.url(&["", "values", &range])?;
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": [cells] });
        self.send(
            self.http
                .put(url)
                .query(&[("valueInputOption", "RAW")])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    /// Writes into the first empty row after the table without shifting rows
    /// below it; returns the sheet row written when the API reports it.
    async fn append_row(&self, cells: Vec<String>) -> Result<Option<usize>, StoreError> {
        let range = a1_range(&self.worksheet, "A1");
        let url = self.url(&["", "values", &format!("{}:append", range)])?;
        let body = json!({ "majorDimension": "ROWS", "values": [cells] });
        let response: AppendResponse = self
            .send(
                self.http
                    .post(url)
                    .query(&[("valueInputOption", "RAW"), ("insertDataOption", "OVERWRITE")])
                    .json(&body),
            )
            .await?
            .json()
            .await?;
        Ok(response
            .updates
            .and_then(|u| u.updated_range)
            .and_then(|r| first_row_of(&r)))
    }
}

/// Snapshot of the data rows; `rows[i]` lives on sheet row `i + 2`.
struct SheetCache {
    rows: Vec<StatusRow>,
    fetched_at: Instant,
}

impl SheetCache {
    fn from_values(values: Vec<Vec<String>>, fetched_at: Instant) -> Self {
        let rows = values.iter().skip(1).map(|cells| StatusRow::from_cells(cells)).collect();
        Self { rows, fetched_at }
    }

    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) <= ttl
    }

    /// Records `row` at `sheet_row`. Returns `false` when that slot already
    /// holds data, which means the snapshot no longer matches the sheet.
    fn place(&mut self, sheet_row: usize, row: StatusRow) -> bool {
        let Some(index) = sheet_row.checked_sub(2) else {
            return false;
        };
        if self.rows.len() <= index {
            self.rows.resize(index + 1, StatusRow::default());
        } else if self.rows[index] != StatusRow::default() {
            return false;
        }
        self.rows[index] = row;
        true
    }
}

pub struct SheetsStore {
    client: SheetsClient,
    ttl: Duration,
    cache: Mutex<Option<SheetCache>>,
}

impl SheetsStore {
    /// Authenticates, makes sure the worksheet and its header row exist, and
    /// primes the cache.
    pub async fn connect(
        spreadsheet_id: &str,
        worksheet: &str,
        auth: SheetsAuth,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::connect_with(http, SHEETS_API, spreadsheet_id, worksheet, auth, ttl).await
    }

    async fn connect_with(
        http: reqwest::Client,
        api_base: &str,
        spreadsheet_id: &str,
        worksheet: &str,
        auth: SheetsAuth,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        let client = SheetsClient {
            http,
            api_base: api_base.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            worksheet: worksheet.to_string(),
            auth,
        };

        if client.worksheet_titles().await?.iter().any(|t| t == worksheet) {
            info!("Worksheet '{}' found", worksheet);
        } else {
            client.add_worksheet().await?;
            info!("Worksheet '{}' created", worksheet);
        }

        let values = client.read_rows().await?;
        let header_blank = values.first().map_or(true, |row| row.iter().all(|c| c.is_empty()));
        if header_blank {
            client.write_row(1, HEADERS.iter().map(|h| h.to_string()).collect()).await?;
            info!("Header row added to '{}'", worksheet);
        } else if values[0].iter().map(String::as_str).ne(HEADERS.iter().copied()) {
            warn!("Worksheet '{}' header differs from the expected columns; reading by position", worksheet);
        }

        let cache = SheetCache::from_values(values, Instant::now());
        debug!("Cached {} rows from '{}'", cache.rows.len(), worksheet);
        Ok(Self { client, ttl, cache: Mutex::new(Some(cache)) })
    }

    async fn fresh_cache<'a>(
        &self,
        slot: &'a mut Option<SheetCache>,
    ) -> Result<&'a mut SheetCache, StoreError> {
        let now = Instant::now();
        if slot.as_ref().map_or(true, |c| !c.is_fresh(self.ttl, now)) {
            debug!("Fetching fresh records from '{}'", self.client.worksheet);
            match self.client.read_rows().await {
                Ok(values) => *slot = Some(SheetCache::from_values(values, now)),
                Err(e) => {
                    *slot = None;
                    return Err(e);
                }
            }
        }
        slot.as_mut()
            .ok_or_else(|| StoreError::Unavailable("cached records are not available".into()))
    }
}

#[async_trait]
impl StateStore for SheetsStore {
    fn backend(&self) -> &str {
        "google_sheets"
    }

    async fn get_previous(&self, key: &StatusKey) -> Result<Option<StatusRecord>, StoreError> {
        let mut slot = self.cache.lock().await;
        let cache = self.fresh_cache(&mut slot).await?;
        Ok(schema::find(&cache.rows, key).and_then(|(_, row)| row.to_record()))
    }

    async fn upsert(
        &self,
        key: &StatusKey,
        status: Status,
        value: &str,
    ) -> Result<StatusRecord, StoreError> {
        let mut slot = self.cache.lock().await;
        let cache = self.fresh_cache(&mut slot).await?;

        let found = schema::find(&cache.rows, key).map(|(i, row)| (i, row.to_record()));
        let existing = found.as_ref().and_then(|(_, record)| record.as_ref());
        let record = StatusRecord::apply(existing, key, status, value, now_local());
        let row = StatusRow::from_record(&record);

        let placed = match found {
            Some((index, _)) => {
                self.client.write_row(index + 2, row.to_cells()).await?;
                debug!("Updated row {} for {}", index + 2, key);
                cache.rows[index] = row;
                true
            }
            None => match self.client.append_row(row.to_cells()).await? {
                Some(sheet_row) => {
                    debug!("Appended row {} for {}", sheet_row, key);
                    cache.place(sheet_row, row)
                }
                None => false,
            },
        };
        if !placed {
            // Snapshot cannot place the row; refetch before the next lookup.
            *slot = None;
        }
        Ok(record)
    }
}
