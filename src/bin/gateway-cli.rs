use clap::{Parser, Subcommand};
use rand::distributions::{Alphanumeric, DistString};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use serde_json::Value;

use zero_gateway::auth::password::hash_password;
use zero_gateway::auth::signature::{
    sign, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER,
};
use zero_gateway::model::unix_now;
use zero_gateway::proxy::login::callback_url;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Signed request client for zero-gateway", long_about = None)]
struct Cli {
    /// User API token.
    #[arg(short, long, env = "ZERO_TOKEN")]
    token: Option<String>,

    /// User API secret.
    #[arg(short, long, env = "ZERO_SECRET")]
    secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the signature headers for a request
    Sign {
        #[arg(short, long, default_value = "GET")]
        method: String,
        path: String,
    },
    /// Send a signed request and print the response
    Request {
        #[arg(short, long, default_value = "GET")]
        method: String,
        url: String,
        /// Accept certificates that do not verify (self-signed fallback).
        #[arg(short = 'k', long)]
        insecure: bool,
    },
    /// Print a single-use browser login link for a service
    LoginUrl {
        /// Service base URL, e.g. https://app.example.com
        service: String,
    },
    /// Print the Argon2 hash to store as a user's `password`
    HashPassword { password: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Sign { method, path } => {
            let (token, secret) = credentials(&cli)?;
            let headers = signed_headers(token, secret, method, path)?;
            for (name, value) in &headers {
                println!("{}: {}", name, value.to_str()?);
            }
        }
        Commands::Request {
            method,
            url,
            insecure,
        } => {
            let (token, secret) = credentials(&cli)?;
            let parsed = url::Url::parse(url)?;
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
            let mut headers = signed_headers(token, secret, method.as_str(), parsed.path())?;
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

            let client = reqwest::Client::builder()
                .danger_accept_invalid_certs(*insecure)
                .build()?;
            let res = client.request(method, parsed).headers(headers).send().await?;
            print_response(res).await?;
        }
        Commands::LoginUrl { service } => {
            let (token, secret) = credentials(&cli)?;
            let nonce = Alphanumeric.sample_string(&mut rand::thread_rng(), 32);
            let link = callback_url(&url::Url::parse(service)?, token, secret, &nonce)?;
            println!("{}", link);
        }
        Commands::HashPassword { password } => {
            println!("{}", hash_password(password)?);
        }
    }

    Ok(())
}

fn credentials(cli: &Cli) -> Result<(&str, &str), Box<dyn std::error::Error>> {
    match (cli.token.as_deref(), cli.secret.as_deref()) {
        (Some(token), Some(secret)) => Ok((token, secret)),
        _ => Err("--token and --secret (or ZERO_TOKEN and ZERO_SECRET) are required".into()),
    }
}

fn signed_headers(
    token: &str,
    secret: &str,
    method: &str,
    path: &str,
) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let timestamp = unix_now();
    let nonce = Alphanumeric.sample_string(&mut rand::thread_rng(), 32);
    let signature = sign(secret, token, timestamp, &nonce, method, path)?;

    let mut headers = HeaderMap::new();
    for (name, value) in [
        (TOKEN_HEADER, token.to_string()),
        (TIMESTAMP_HEADER, timestamp.to_string()),
        (NONCE_HEADER, nonce),
        (SIGNATURE_HEADER, signature),
    ] {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(&value)?,
        );
    }
    Ok(headers)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
