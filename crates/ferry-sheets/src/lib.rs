//! Google Sheets plugin: pick a workbook and worksheet per chat, read the
//! header row and append rows.

use std::sync::Arc;

use async_trait::async_trait;

use ferry_core::{
    cache::SessionStore,
    commands::{CommandRequest, CommandSpec, ADMIN_ONLY},
    config::Config,
    domain::ChatId,
    errors::Error,
    formatting::escape_html,
    oauth::{api_client, extract_code},
    plugins::Plugin,
    Result,
};

pub mod client;

use client::{GoogleEndpoints, SheetsClient, Workbook};

/// What a chat has picked so far.
#[derive(Clone, Debug, Default)]
pub struct SheetsSession {
    /// Result of the last `/list_workbooks`, for numbered selection.
    pub listing: Vec<Workbook>,
    pub workbook: Option<Workbook>,
    pub worksheet: Option<String>,
}

pub struct SheetsPlugin {
    client: SheetsClient,
    sessions: SessionStore<SheetsSession>,
}

pub fn setup(cfg: &Config) -> Result<Option<Arc<dyn Plugin>>> {
    let Some(settings) = &cfg.google else {
        return Ok(None);
    };
    let client = SheetsClient::new(api_client()?, settings, GoogleEndpoints::default());
    Ok(Some(Arc::new(SheetsPlugin::new(client, cfg.session_capacity))))
}

impl SheetsPlugin {
    pub fn new(client: SheetsClient, session_capacity: usize) -> Self {
        Self {
            client,
            sessions: SessionStore::new(session_capacity),
        }
    }

    fn auth(&self) -> Result<String> {
        let url = self.client.authorize_url()?;
        Ok(format!(
            "Please visit this URL to authorize Google Sheets access:\n{}\n\n\
Then send me the URL you were redirected to (or just the code) with \
/gsheets_code &lt;url&gt;.",
            escape_html(&url)
        ))
    }

    async fn code(&self, args: &str) -> Result<String> {
        let code = extract_code(args).ok_or_else(|| {
            Error::InvalidInput(
                "Please provide the redirect URL or code after the /gsheets_code command."
                    .to_string(),
            )
        })?;
        let tokens = self.client.exchange_code(&code).await?;
        Ok(if tokens.refresh_token.is_some() {
            "Google authorization successful! Use /list_workbooks to get started.".to_string()
        } else {
            "Google authorization partially successful. No refresh token received, so you \
may need to run /gsheets_auth again when the access token expires."
                .to_string()
        })
    }

    async fn list_workbooks(&self, chat: ChatId) -> Result<String> {
        let workbooks = self.client.list_workbooks().await?;
        if workbooks.is_empty() {
            return Ok("No spreadsheets found for this account.".to_string());
        }

        let lines = workbooks
            .iter()
            .enumerate()
            .map(|(i, w)| format!("{}. {}", i + 1, escape_html(&w.name)))
            .collect::<Vec<_>>()
            .join("\n");
        self.sessions
            .update(chat, |s| s.listing = workbooks)
            .await;

        Ok(format!(
            "<b>Workbooks</b>\n{lines}\n\nUse /select_workbook &lt;number&gt; to pick one."
        ))
    }

    async fn select_workbook(&self, chat: ChatId, args: &str) -> Result<String> {
        let arg = args.trim();
        if arg.is_empty() {
            return Err(Error::InvalidInput(
                "Usage: /select_workbook <number from /list_workbooks | spreadsheet id>"
                    .to_string(),
            ));
        }

        let session = self.sessions.get(chat).await;
        let workbook = match arg.parse::<usize>() {
            Ok(n) => session
                .listing
                .get(n.wrapping_sub(1))
                .cloned()
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "No workbook number {n}. Run /list_workbooks first."
                    ))
                })?,
            Err(_) => session
                .listing
                .iter()
                .find(|w| w.id == arg || w.name.eq_ignore_ascii_case(arg))
                .cloned()
                .unwrap_or_else(|| Workbook {
                    id: arg.to_string(),
                    name: arg.to_string(),
                }),
        };

        // Also validates ids typed by hand.
        let worksheets = self.client.list_worksheets(&workbook.id).await?;
        let reply = format!(
            "Selected workbook <b>{}</b>.\n\n{}",
            escape_html(&workbook.name),
            worksheet_listing(&worksheets)
        );
        self.sessions
            .update(chat, |s| {
                s.workbook = Some(workbook);
                s.worksheet = None;
            })
            .await;
        Ok(reply)
    }

    async fn select_worksheet(&self, chat: ChatId, args: &str) -> Result<String> {
        let workbook = self.require_workbook(chat).await?;
        let worksheets = self.client.list_worksheets(&workbook.id).await?;

        let arg = args.trim();
        if arg.is_empty() {
            return Ok(worksheet_listing(&worksheets));
        }

        let chosen = match arg.parse::<usize>() {
            Ok(n) => worksheets.get(n.wrapping_sub(1)).cloned(),
            Err(_) => worksheets
                .iter()
                .find(|w| w.eq_ignore_ascii_case(arg))
                .cloned(),
        }
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "No worksheet \"{arg}\" in {}. Use /select_worksheet to list them.",
                workbook.name
            ))
        })?;

        let reply = format!(
            "Selected worksheet <b>{}</b>. Use /headers or /add_row.",
            escape_html(&chosen)
        );
        self.sessions
            .update(chat, |s| s.worksheet = Some(chosen))
            .await;
        Ok(reply)
    }

    async fn headers(&self, chat: ChatId) -> Result<String> {
        let (workbook, sheet) = self.require_selection(chat).await?;
        let headers = self.client.headers(&workbook.id, &sheet).await?;
        if headers.is_empty() {
            return Ok(format!(
                "<b>{}</b> has no header row.",
                escape_html(&sheet)
            ));
        }
        Ok(format!(
            "<b>Headers of {}</b>\n{}",
            escape_html(&sheet),
            escape_html(&headers.join(" | "))
        ))
    }

    async fn add_row(&self, chat: ChatId, args: &str) -> Result<String> {
        let values = parse_row(args)?;
        let (workbook, sheet) = self.require_selection(chat).await?;
        let range = self.client.append_row(&workbook.id, &sheet, &values).await?;
        Ok(match range {
            Some(r) => format!("Row added to <code>{}</code>.", escape_html(&r)),
            None => format!("Row added to <b>{}</b>.", escape_html(&sheet)),
        })
    }

    async fn require_workbook(&self, chat: ChatId) -> Result<Workbook> {
        self.sessions.get(chat).await.workbook.ok_or_else(|| {
            Error::InvalidInput(
                "No workbook selected. Use /list_workbooks and /select_workbook first."
                    .to_string(),
            )
        })
    }

    async fn require_selection(&self, chat: ChatId) -> Result<(Workbook, String)> {
        let workbook = self.require_workbook(chat).await?;
        let sheet = self.sessions.get(chat).await.worksheet.ok_or_else(|| {
            Error::InvalidInput("No worksheet selected. Use /select_worksheet first.".to_string())
        })?;
        Ok((workbook, sheet))
    }
}

#[async_trait]
impl Plugin for SheetsPlugin {
    fn name(&self) -> &'static str {
        "gsheets"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        let spec = |name: &'static str, description: &'static str| CommandSpec {
            name,
            description,
            roles: ADMIN_ONLY,
        };
        vec![
            spec("gsheets_auth", "Connect the bot to Google Sheets"),
            spec("gsheets_code", "Finish Google authorization with the redirect URL"),
            spec("list_workbooks", "List available spreadsheets"),
            spec("select_workbook", "Select a spreadsheet by number or id"),
            spec("select_worksheet", "List or select a worksheet"),
            spec("headers", "Show the header row of the selected worksheet"),
            spec("add_row", "Append a row: value1 | value2 | ..."),
        ]
    }

    async fn handle(&self, req: CommandRequest) -> Result<String> {
        let chat = req.chat_id;
        match req.name.as_str() {
            "gsheets_auth" => self.auth(),
            "gsheets_code" => self.code(&req.args).await,
            "list_workbooks" => self.list_workbooks(chat).await,
            "select_workbook" => self.select_workbook(chat, &req.args).await,
            "select_worksheet" => self.select_worksheet(chat, &req.args).await,
            "headers" => self.headers(chat).await,
            "add_row" => self.add_row(chat, &req.args).await,
            other => Err(Error::InvalidInput(format!("Unknown Sheets command /{other}"))),
        }
    }
}

fn worksheet_listing(worksheets: &[String]) -> String {
    if worksheets.is_empty() {
        return "This workbook has no worksheets.".to_string();
    }
    let lines = worksheets
        .iter()
        .enumerate()
        .map(|(i, w)| format!("{}. {}", i + 1, escape_html(w)))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<b>Worksheets</b>\n{lines}\n\nUse /select_worksheet &lt;name|number&gt;.")
}

/// `a | b | c` into cell values; empty cells in the middle are kept.
pub fn parse_row(args: &str) -> Result<Vec<String>> {
    let values: Vec<String> = args.split('|').map(|v| v.trim().to_string()).collect();
    if values.iter().all(String::is_empty) {
        return Err(Error::InvalidInput(
            "Usage: /add_row value1 | value2 | ...".to_string(),
        ));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ferry_core::{
        config::GoogleSettings,
        domain::{MessageId, MessageRef, Role, UserId},
        oauth::TokenSet,
    };
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn plugin(server: &MockServer, dir: &Path) -> SheetsPlugin {
        let tokens = TokenSet {
            access_token: "gat".to_string(),
            refresh_token: Some("grt".to_string()),
            expires_at: None,
        };
        let token_file = dir.join("google_tokens.json");
        std::fs::write(&token_file, serde_json::to_string(&tokens).unwrap()).unwrap();

        let settings = GoogleSettings {
            client_id: "gid".to_string(),
            client_secret: "gsecret".to_string(),
            redirect_uri: "http://localhost:8080/oauth2callback".to_string(),
            token_file,
        };
        let endpoints = GoogleEndpoints {
            auth_url: format!("{}/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            drive_url: format!("{}/drive/v3", server.uri()),
            sheets_url: format!("{}/v4", server.uri()),
        };
        SheetsPlugin::new(
            SheetsClient::new(reqwest::Client::new(), &settings, endpoints),
            8,
        )
    }

    fn request(chat: i64, name: &str, args: &str) -> CommandRequest {
        CommandRequest {
            chat_id: ChatId(chat),
            user_id: Some(UserId(1)),
            username: "admin".to_string(),
            role: Role::Admin,
            name: name.to_string(),
            args: args.to_string(),
            message: MessageRef {
                chat_id: ChatId(chat),
                message_id: MessageId(1),
            },
        }
    }

    async fn mount_workbooks(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "mimeType='application/vnd.google-apps.spreadsheet'",
            ))
            .and(query_param("pageSize", "50"))
            .and(header("Authorization", "Bearer gat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "wb-1", "name": "Budget"},
                    {"id": "wb-2", "name": "Inventory"}
                ]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/wb-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [
                    {"properties": {"title": "Sheet1"}},
                    {"properties": {"title": "Orders"}}
                ]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn parses_rows() {
        assert_eq!(
            parse_row(" a | | c ").unwrap(),
            vec!["a".to_string(), String::new(), "c".to_string()]
        );
        assert!(parse_row("  ").is_err());
        assert!(parse_row(" | ").is_err());
    }

    #[tokio::test]
    async fn full_selection_flow_appends_rows() {
        let server = MockServer::start().await;
        mount_workbooks(&server).await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/wb-2/values/Orders!1:1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Orders!A1:C1",
                "values": [["Date", "Item", 3]]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/wb-2/values/Orders!A:A:append"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(body_json(json!({"values": [["2024-01-01", "Widget", "4"]]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "updates": {"updatedRange": "Orders!A7:C7"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(&server, dir.path());

        let listing = plugin.handle(request(5, "list_workbooks", "")).await.unwrap();
        assert!(listing.contains("1. Budget\n2. Inventory"));

        let selected = plugin.handle(request(5, "select_workbook", "2")).await.unwrap();
        assert!(selected.starts_with("Selected workbook <b>Inventory</b>."));
        assert!(selected.contains("2. Orders"));

        let sheet = plugin
            .handle(request(5, "select_worksheet", "orders"))
            .await
            .unwrap();
        assert!(sheet.starts_with("Selected worksheet <b>Orders</b>."));

        let headers = plugin.handle(request(5, "headers", "")).await.unwrap();
        assert!(headers.ends_with("Date | Item | 3"));

        let added = plugin
            .handle(request(5, "add_row", "2024-01-01 | Widget | 4"))
            .await
            .unwrap();
        assert_eq!(added, "Row added to <code>Orders!A7:C7</code>.");
    }

    #[tokio::test]
    async fn selections_are_per_chat() {
        let server = MockServer::start().await;
        mount_workbooks(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let plugin = plugin(&server, dir.path());
        plugin.handle(request(1, "list_workbooks", "")).await.unwrap();
        plugin.handle(request(1, "select_workbook", "2")).await.unwrap();

        let err = plugin.handle(request(2, "headers", "")).await.unwrap_err();
        assert!(err.user_message().starts_with("No workbook selected"));

        let err = plugin.handle(request(2, "select_workbook", "1")).await.unwrap_err();
        assert!(err.user_message().contains("Run /list_workbooks first"));
    }

    #[tokio::test]
    async fn disabled_drive_api_gets_a_helpful_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "Drive API has not been used", "errors": [{"reason": "accessNotConfigured"}]}
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = plugin(&server, dir.path())
            .handle(request(1, "list_workbooks", ""))
            .await
            .unwrap_err();
        assert!(err.user_message().contains("Google Drive API is not enabled"));
    }
}
