//! Zoho Books invoicing plugin.

use std::sync::Arc;

use async_trait::async_trait;

use ferry_core::{
    commands::{CommandRequest, CommandSpec, ADMIN_ONLY},
    config::Config,
    errors::Error,
    formatting::escape_html,
    oauth::{api_client, extract_code},
    plugins::Plugin,
    Result,
};

pub mod client;

use client::{LineItem, ZohoClient, ZohoEndpoints};

const CREATE_INVOICE_USAGE: &str =
    "Usage: /create_invoice <customer_id> <item_id>:<rate>[:<quantity>] ...";
const MAX_LISTED_CUSTOMERS: usize = 10;

pub struct ZohoPlugin {
    client: ZohoClient,
}

/// Registry factory: enabled when Zoho client credentials are configured.
pub fn setup(cfg: &Config) -> Result<Option<Arc<dyn Plugin>>> {
    let Some(settings) = &cfg.zoho else {
        return Ok(None);
    };
    let client = ZohoClient::new(api_client()?, settings, ZohoEndpoints::default());
    Ok(Some(Arc::new(ZohoPlugin::new(client))))
}

impl ZohoPlugin {
    pub fn new(client: ZohoClient) -> Self {
        Self { client }
    }

    fn auth(&self) -> Result<String> {
        let url = self.client.authorize_url()?;
        Ok(format!(
            "Please visit this URL to authorize the application:\n{}\n\n\
After authorization you'll be redirected to a page. Copy the entire URL from \
your browser's address bar and send it to me with /zoho_code &lt;url&gt;.",
            escape_html(&url)
        ))
    }

    async fn code(&self, args: &str) -> Result<String> {
        let code = extract_code(args).ok_or_else(|| {
            Error::InvalidInput(
                "Please provide the full URL after the /zoho_code command.".to_string(),
            )
        })?;

        let tokens = self.client.exchange_code(&code).await.map_err(|e| match e {
            Error::Auth(msg) => Error::Auth(format!(
                "Authorization failed: {msg}. Please try again with /zoho_auth."
            )),
            other => other,
        })?;

        Ok(if tokens.refresh_token.is_some() {
            "Authorization successful! You can now use Zoho Books commands.".to_string()
        } else {
            "Authorization partially successful. No refresh token received. \
You may need to reauthorize more frequently. You can use Zoho Books commands for now."
                .to_string()
        })
    }

    async fn create_invoice(&self, args: &str) -> Result<String> {
        let (customer_id, items) = parse_invoice_args(args)?;
        let invoice = self.client.create_invoice(&customer_id, &items).await?;

        let mut out = format!(
            "Invoice created successfully. Invoice ID: <code>{}</code>",
            escape_html(&invoice.invoice_id)
        );
        if let Some(number) = &invoice.invoice_number {
            out.push_str(&format!("\nNumber: {}", escape_html(number)));
        }
        if let Some(total) = invoice.total {
            out.push_str(&format!("\nTotal: {total:.2}"));
        }
        Ok(out)
    }

    async fn list_customers(&self) -> Result<String> {
        let customers = self.client.list_customers().await?;
        if customers.is_empty() {
            return Ok("No customers found.".to_string());
        }

        let lines = customers
            .iter()
            .take(MAX_LISTED_CUSTOMERS)
            .map(|c| {
                if c.contact_id.is_empty() {
                    escape_html(&c.contact_name)
                } else {
                    format!(
                        "{} (<code>{}</code>)",
                        escape_html(&c.contact_name),
                        escape_html(&c.contact_id)
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!(
            "Here are the first {} customers:\n{lines}",
            customers.len().min(MAX_LISTED_CUSTOMERS)
        ))
    }
}

#[async_trait]
impl Plugin for ZohoPlugin {
    fn name(&self) -> &'static str {
        "zoho"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec {
                name: "zoho_auth",
                description: "Connect the bot to Zoho Books",
                roles: ADMIN_ONLY,
            },
            CommandSpec {
                name: "zoho_code",
                description: "Finish Zoho authorization with the redirect URL",
                roles: ADMIN_ONLY,
            },
            CommandSpec {
                name: "create_invoice",
                description: "Create an invoice: <customer_id> <item_id>:<rate>[:<qty>] ...",
                roles: ADMIN_ONLY,
            },
            CommandSpec {
                name: "list_customers",
                description: "List the first 10 Zoho customers",
                roles: ADMIN_ONLY,
            },
        ]
    }

    async fn handle(&self, req: CommandRequest) -> Result<String> {
        match req.name.as_str() {
            "zoho_auth" => self.auth(),
            "zoho_code" => self.code(&req.args).await,
            "create_invoice" => self.create_invoice(&req.args).await,
            "list_customers" => self.list_customers().await,
            other => Err(Error::InvalidInput(format!("Unknown Zoho command /{other}"))),
        }
    }
}

/// `<customer_id> <item_id>:<rate>[:<quantity>] ...`
pub fn parse_invoice_args(args: &str) -> Result<(String, Vec<LineItem>)> {
    let usage = || Error::InvalidInput(CREATE_INVOICE_USAGE.to_string());

    let mut parts = args.split_whitespace();
    let customer_id = parts.next().ok_or_else(usage)?.to_string();

    let mut items = Vec::new();
    for raw in parts {
        let fields: Vec<&str> = raw.split(':').collect();
        let (item_id, rate, quantity) = match fields.as_slice() {
            [id, rate] => (*id, *rate, "1"),
            [id, rate, qty] => (*id, *rate, *qty),
            _ => return Err(usage()),
        };
        let rate = parse_amount(rate).ok_or_else(|| {
            Error::InvalidInput(format!("Invalid rate `{rate}` for item {item_id}"))
        })?;
        let quantity = parse_amount(quantity).filter(|q| *q > 0.0).ok_or_else(|| {
            Error::InvalidInput(format!("Invalid quantity `{quantity}` for item {item_id}"))
        })?;
        if item_id.is_empty() {
            return Err(usage());
        }
        items.push(LineItem {
            item_id: item_id.to_string(),
            rate,
            quantity,
        });
    }

    if items.is_empty() {
        return Err(usage());
    }
    Ok((customer_id, items))
}

fn parse_amount(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}
