use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::PathBuf;

use inventory_api::billing::{signature_header, SIGNATURE_HEADER};
use inventory_api::session::REFRESH_COOKIE;

#[derive(Parser)]
#[command(name = "inventory-cli")]
#[command(about = "CLI for the inventory API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "INVENTORY_API_URL", default_value = "http://localhost:3001")]
    url: String,

    /// Where the access and refresh tokens are kept between runs.
    #[arg(long, default_value = ".inventory_session")]
    session_file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    Signup {
        #[arg(short, long)]
        id: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Me,
    Update {
        #[arg(short, long)]
        name: String,
    },
    Products {
        #[arg(short, long)]
        search: Option<String>,
    },
    CreateProduct {
        #[arg(short, long)]
        id: Option<String>,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        price: f64,
        #[arg(short, long)]
        rating: Option<f64>,
        #[arg(short = 'q', long)]
        stock_quantity: i64,
    },
    DeleteProduct {
        #[arg(short, long)]
        id: String,
    },
    Users,
    Expenses,
    Dashboard,
    /// Sign a saved event payload and post it to the webhook endpoint.
    ReplayWebhook {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, env = "STRIPE_WEBHOOK_SECRET")]
        secret: String,
    },
}

#[derive(Serialize, Deserialize, Default)]
struct SavedSession {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tokens {
    access_token: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    message: String,
    tokens: Tokens,
}

fn load_session(path: &PathBuf) -> SavedSession {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn save_session(path: &PathBuf, session: &SavedSession) -> anyhow::Result<()> {
    fs::write(path, serde_json::to_string(session)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// What the `Set-Cookie` headers say about the refresh cookie: `None` when
/// untouched, `Some(None)` when cleared, `Some(Some(token))` when replaced.
fn refresh_update<'a>(set_cookies: impl IntoIterator<Item = &'a str>) -> Option<Option<String>> {
    set_cookies.into_iter().find_map(|cookie| {
        let (name, rest) = cookie.split_once('=')?;
        if name.trim() != REFRESH_COOKIE {
            return None;
        }
        let value = rest.split(';').next().unwrap_or_default().trim().trim_matches('"');
        let cleared = value.is_empty()
            || cookie
                .split(';')
                .any(|attr| attr.trim().eq_ignore_ascii_case("max-age=0"));
        Some((!cleared).then(|| value.to_string()))
    })
}

fn set_cookies(response: &Response) -> Vec<&str> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect()
}

fn authorized(request: RequestBuilder, session: &SavedSession) -> RequestBuilder {
    let request = request.bearer_auth(&session.access_token);
    match &session.refresh_token {
        Some(refresh) => request.header(header::COOKIE, format!("{REFRESH_COOKIE}={refresh}")),
        None => request,
    }
}

/// Send an authenticated request, keeping any re-issued access token and
/// forgetting a refresh token the server has cleared.
async fn send(
    request: RequestBuilder,
    session: &mut SavedSession,
    path: &PathBuf,
) -> anyhow::Result<StatusCode> {
    let res = authorized(request, session).send().await?;
    let reissued = res
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let refresh = refresh_update(set_cookies(&res));

    let mut changed = false;
    if let Some(token) = reissued {
        session.access_token = token;
        changed = true;
        println!("Access token refreshed.");
    }
    if let Some(refresh) = refresh {
        if refresh.is_none() && session.refresh_token.is_some() {
            println!("Refresh token cleared by the server; login again when the access token expires.");
        }
        session.refresh_token = refresh;
        changed = true;
    }
    if changed {
        save_session(path, session)?;
    }

    let status = res.status();
    println!("Response ({}): {}", status, res.text().await?);
    Ok(status)
}

async fn authenticate(res: Response, path: &PathBuf) -> anyhow::Result<()> {
    if !res.status().is_success() {
        println!("Failed ({}): {}", res.status(), res.text().await?);
        return Ok(());
    }
    let refresh_token = refresh_update(set_cookies(&res)).flatten();
    let body: AuthResponse = res.json().await?;
    save_session(
        path,
        &SavedSession {
            access_token: body.tokens.access_token,
            refresh_token,
        },
    )?;
    println!("{} Session saved to {}", body.message, path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let path = cli.session_file;
    let mut session = load_session(&path);

    match cli.command {
        Commands::Signup { id, name, email, password } => {
            let res = client
                .post(format!("{}/admin/signup", cli.url))
                .json(&json!({
                    "adminUserId": id,
                    "name": name,
                    "email": email,
                    "password": password
                }))
                .send()
                .await?;
            authenticate(res, &path).await?;
        }
        Commands::Login { email, password } => {
            let res = client
                .post(format!("{}/admin/login", cli.url))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            authenticate(res, &path).await?;
        }
        Commands::Logout => {
            let status =
                send(client.post(format!("{}/admin/logout", cli.url)), &mut session, &path).await?;
            if status.is_success() {
                let _ = fs::remove_file(&path);
                println!("Session removed.");
            } else {
                println!("Logout was rejected; session kept in {}", path.display());
            }
        }
        Commands::Me => {
            send(client.get(format!("{}/admin/me", cli.url)), &mut session, &path).await?;
        }
        Commands::Update { name } => {
            let request = client
                .patch(format!("{}/admin/update", cli.url))
                .json(&json!({ "name": name }));
            send(request, &mut session, &path).await?;
        }
        Commands::Products { search } => {
            let mut request = client.get(format!("{}/products", cli.url));
            if let Some(search) = search {
                request = request.query(&[("search", search)]);
            }
            send(request, &mut session, &path).await?;
        }
        Commands::CreateProduct { id, name, price, rating, stock_quantity } => {
            let request = client.post(format!("{}/products", cli.url)).json(&json!({
                "productId": id,
                "name": name,
                "price": price,
                "rating": rating,
                "stockQuantity": stock_quantity
            }));
            send(request, &mut session, &path).await?;
        }
        Commands::DeleteProduct { id } => {
            let request = client.delete(format!("{}/products/{}", cli.url, id));
            send(request, &mut session, &path).await?;
        }
        Commands::Users => {
            send(client.get(format!("{}/users", cli.url)), &mut session, &path).await?;
        }
        Commands::Expenses => {
            send(client.get(format!("{}/expenses", cli.url)), &mut session, &path).await?;
        }
        Commands::Dashboard => {
            send(client.get(format!("{}/dashboard", cli.url)), &mut session, &path).await?;
        }
        Commands::ReplayWebhook { file, secret } => {
            let payload = fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let signature = signature_header(&secret, Utc::now().timestamp(), &payload);
            let res = client
                .post(format!("{}/api/payments/webhook", cli.url))
                .header(header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(payload)
                .send()
                .await?;
            println!("Response ({}): {}", res.status(), res.text().await?);
        }
    }

    Ok(())
}
