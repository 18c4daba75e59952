//! Google Drive + Sheets REST client.

use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use ferry_core::{
    config::GoogleSettings,
    errors::Error,
    formatting::truncate_text,
    oauth::{OAuthClient, OAuthConfig, TokenSet},
    Result,
};

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const WORKBOOK_PAGE_SIZE: u32 = 50;
const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.readonly",
];
const DRIVE_API_HELP: &str = "Google Drive API is not enabled. Please visit \
https://console.cloud.google.com/apis/library/drive.googleapis.com to enable it and \
try again in a few minutes.";

#[derive(Clone, Debug)]
pub struct GoogleEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub drive_url: String,
    pub sheets_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            drive_url: "https://www.googleapis.com/drive/v3".to_string(),
            sheets_url: "https://sheets.googleapis.com/v4".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Workbook {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<Workbook>,
}

#[derive(Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Deserialize)]
struct Sheet {
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
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
}

pub struct SheetsClient {
    http: reqwest::Client,
    oauth: OAuthClient,
    drive_url: String,
    sheets_url: String,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, settings: &GoogleSettings, endpoints: GoogleEndpoints) -> Self {
        let oauth = OAuthClient::new(
            http.clone(),
            OAuthConfig {
                provider: "Google",
                auth_command: "gsheets_auth",
                auth_url: endpoints.auth_url,
                token_url: endpoints.token_url,
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                redirect_uri: settings.redirect_uri.clone(),
                scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
                extra_params: vec![
                    ("access_type".to_string(), "offline".to_string()),
                    ("prompt".to_string(), "consent".to_string()),
                ],
            },
            settings.token_file.clone(),
        );

        Self {
            http,
            oauth,
            drive_url: endpoints.drive_url.trim_end_matches('/').to_string(),
            sheets_url: endpoints.sheets_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn authorize_url(&self) -> Result<String> {
        self.oauth.authorize_url()
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        self.oauth.exchange_code(code).await
    }

    /// Spreadsheets visible to the authorized account (first page only).
    pub async fn list_workbooks(&self) -> Result<Vec<Workbook>> {
        let url = format!("{}/files", self.drive_url);
        let q = format!("mimeType='{SPREADSHEET_MIME}'");
        let page_size = WORKBOOK_PAGE_SIZE.to_string();
        let resp = self
            .send(|| {
                self.http.get(&url).query(&[
                    ("q", q.as_str()),
                    ("fields", "files(id, name)"),
                    ("pageSize", page_size.as_str()),
                ])
            })
            .await?;

        let list: FileList = read_json(ok_or_error("listing workbooks", resp).await?).await?;
        info!(count = list.files.len(), "workbooks listed");
        Ok(list.files)
    }

    pub async fn list_worksheets(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
        let url = self.sheets_endpoint(&[spreadsheet_id])?;
        let resp = self
            .send(|| {
                self.http
                    .get(url.clone())
                    .query(&[("fields", "sheets.properties.title")])
            })
            .await?;

        let sheet: Spreadsheet = read_json(ok_or_error("listing worksheets", resp).await?).await?;
        Ok(sheet.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    /// First row of `sheet`, rendered as strings.
    pub async fn headers(&self, spreadsheet_id: &str, sheet: &str) -> Result<Vec<String>> {
        let range = a1_range(sheet, "1:1");
        let url = self.sheets_endpoint(&[spreadsheet_id, "values", &range])?;
        let resp = self.send(|| self.http.get(url.clone())).await?;

        let values: ValueRange = read_json(ok_or_error("reading headers", resp).await?).await?;
        let headers = values
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect::<Vec<_>>();
        debug!(count = headers.len(), "headers fetched");
        Ok(headers)
    }

    /// Append one row below the data in `sheet`; returns the updated range.
    pub async fn append_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: &[String],
    ) -> Result<Option<String>> {
        let range = format!("{}:append", a1_range(sheet, "A:A"));
        let url = self.sheets_endpoint(&[spreadsheet_id, "values", &range])?;
        let body = json!({ "values": [values] });
        let resp = self
            .send(|| {
                self.http
                    .post(url.clone())
                    .query(&[
                        ("valueInputOption", "USER_ENTERED"),
                        ("insertDataOption", "INSERT_ROWS"),
                    ])
                    .json(&body)
            })
            .await?;

        let appended: AppendResponse = read_json(ok_or_error("adding a row", resp).await?).await?;
        let updated = appended.updates.and_then(|u| u.updated_range);
        info!(sheet, cells = values.len(), range = ?updated, "row appended");
        Ok(updated)
    }

    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        self.oauth
            .send_authorized(|token| build().bearer_auth(token))
            .await
    }

    fn sheets_endpoint(&self, segments: &[&str]) -> Result<Url> {
        let base = format!("{}/spreadsheets", self.sheets_url);
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Config(format!("invalid Sheets API url {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Sheets API url {base} cannot have a path")))?
            .extend(segments);
        Ok(url)
    }
}

/// A1 notation for `cells` on `sheet`, quoting names that need it.
pub fn a1_range(sheet: &str, cells: &str) -> String {
    let plain = !sheet.is_empty() && sheet.chars().all(|c| c.is_alphanumeric() || c == '_');
    if plain {
        format!("{sheet}!{cells}")
    } else {
        format!("'{}'!{cells}", sheet.replace('\'', "''"))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    resp.json()
        .await
        .map_err(|e| Error::External(format!("Google returned an unexpected body: {e}")))
}

async fn ok_or_error(action: &str, resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    warn!(%status, body = %truncate_text(&body, 500), "google error while {action}");

    if body.contains("accessNotConfigured") || body.contains("SERVICE_DISABLED") {
        return Err(Error::External(DRIVE_API_HELP.to_string()));
    }
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| truncate_text(&body, 200));
    Err(Error::External(format!(
        "Google returned {status} while {action}: {message}"
    )))
}
