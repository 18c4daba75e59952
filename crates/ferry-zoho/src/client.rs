//! Zoho Books REST client.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ferry_core::{
    config::ZohoSettings,
    errors::Error,
    formatting::truncate_text,
    oauth::{OAuthClient, OAuthConfig, TokenSet},
    Result,
};

pub const ACCOUNTS_URL: &str = "https://accounts.zoho.com";
pub const BOOKS_API_URL: &str = "https://books.zoho.com/api/v3";
const SCOPE: &str = "ZohoBooks.fullaccess.all";

/// Base URLs, overridable for regional data centers and tests.
#[derive(Clone, Debug)]
pub struct ZohoEndpoints {
    pub accounts_url: String,
    pub api_url: String,
}

impl Default for ZohoEndpoints {
    fn default() -> Self {
        Self {
            accounts_url: ACCOUNTS_URL.to_string(),
            api_url: BOOKS_API_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LineItem {
    pub item_id: String,
    pub rate: f64,
    pub quantity: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub contact_id: String,
    pub contact_name: String,
}

#[derive(Deserialize)]
struct InvoiceEnvelope {
    invoice: Invoice,
}

#[derive(Deserialize)]
struct ContactsEnvelope {
    #[serde(default)]
    contacts: Vec<Contact>,
}

#[derive(Serialize)]
struct NewInvoice<'a> {
    customer_id: &'a str,
    line_items: &'a [LineItem],
}

pub struct ZohoClient {
    http: reqwest::Client,
    oauth: OAuthClient,
    api_url: String,
    organization_id: Option<String>,
}

impl ZohoClient {
    pub fn new(http: reqwest::Client, settings: &ZohoSettings, endpoints: ZohoEndpoints) -> Self {
        let accounts = endpoints.accounts_url.trim_end_matches('/');
        let oauth = OAuthClient::new(
            http.clone(),
            OAuthConfig {
                provider: "Zoho",
                auth_command: "zoho_auth",
                auth_url: format!("{accounts}/oauth/v2/auth"),
                token_url: format!("{accounts}/oauth/v2/token"),
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                redirect_uri: settings.redirect_uri.clone(),
                scopes: vec![SCOPE.to_string()],
                extra_params: vec![("access_type".to_string(), "offline".to_string())],
            },
            settings.token_file.clone(),
        );

        Self {
            http,
            oauth,
            api_url: endpoints.api_url.trim_end_matches('/').to_string(),
            organization_id: settings.organization_id.clone(),
        }
    }

    pub fn authorize_url(&self) -> Result<String> {
        self.oauth.authorize_url()
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        self.oauth.exchange_code(code).await
    }

    pub async fn create_invoice(&self, customer_id: &str, items: &[LineItem]) -> Result<Invoice> {
        let url = format!("{}/invoices", self.api_url);
        let body = NewInvoice {
            customer_id,
            line_items: items,
        };
        let resp = self
            .oauth
            .send_authorized(|token| self.authed(self.http.post(&url), token).json(&body))
            .await?;

        if resp.status() != StatusCode::CREATED {
            return Err(unexpected("creating an invoice", resp).await);
        }
        let envelope: InvoiceEnvelope = read_json(resp).await?;
        info!(
            invoice_id = %envelope.invoice.invoice_id,
            customer_id,
            items = items.len(),
            "invoice created"
        );
        Ok(envelope.invoice)
    }

    pub async fn list_customers(&self) -> Result<Vec<Contact>> {
        let url = format!("{}/contacts", self.api_url);
        let resp = self
            .oauth
            .send_authorized(|token| {
                self.authed(self.http.get(&url), token)
                    .query(&[("contact_type", "customer")])
            })
            .await?;

        if !resp.status().is_success() {
            return Err(unexpected("listing customers", resp).await);
        }
        let envelope: ContactsEnvelope = read_json(resp).await?;
        debug!(count = envelope.contacts.len(), "customers fetched");
        Ok(envelope.contacts)
    }

    fn authed(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        let req = req.header("Authorization", format!("Zoho-oauthtoken {token}"));
        match &self.organization_id {
            Some(org) => req.query(&[("organization_id", org.as_str())]),
            None => req,
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    resp.json()
        .await
        .map_err(|e| Error::External(format!("Zoho Books returned an unexpected body: {e}")))
}

async fn unexpected(action: &str, resp: Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    warn!(%status, body = %truncate_text(&body, 500), "zoho error while {action}");
    Error::External(format!(
        "Zoho Books returned {status} while {action}: {}",
        truncate_text(&body, 200)
    ))
}
