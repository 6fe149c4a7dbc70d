use crate::auth_service::AuthService;
use crate::dispatch::{ApiRequest, Transport};
use crate::errors::{AppError, AuthError};
use crate::guards::{GuardDecision, require_auth};
use crate::models::{LoginCredentials, User, token_preview};
use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use secrecy::SecretString;
use std::io::Write;
use std::path::PathBuf;

/// Backoffice client - authenticated access to the administration API
#[derive(Parser)]
#[command(name = "backoffice")]
#[command(about = "Command line client for the backoffice API with automatic session renewal", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging level (overrides the configuration file)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Log in and store the session
    Login(LoginArgs),

    /// Log out and forget the stored session
    Logout,

    /// Show the logged in user as reported by the server
    Whoami,

    /// Show the locally stored session
    Status,

    /// Ask the server whether the current token is valid
    Verify,

    /// Send an authenticated request and print the response
    Request(RequestArgs),
}

#[derive(Args, Clone)]
pub struct LoginArgs {
    /// Username (prompted when omitted)
    #[arg(short, long)]
    pub username: Option<String>,
}

#[derive(Args, Clone)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[arg(value_name = "METHOD")]
    pub method: String,

    /// Path relative to the API base URL (e.g. "/menus")
    #[arg(value_name = "PATH")]
    pub path: String,

    /// JSON request body
    #[arg(short, long, value_name = "JSON")]
    pub data: Option<String>,
}

pub async fn handle_command<T: Transport>(
    command: Commands,
    service: &AuthService<T>,
) -> Result<(), AppError> {
    match command {
        Commands::Login(args) => handle_login_command(args, service).await,
        Commands::Logout => handle_logout_command(service).await,
        Commands::Whoami => handle_whoami_command(service).await,
        Commands::Status => handle_status_command(service),
        Commands::Verify => handle_verify_command(service).await,
        Commands::Request(args) => handle_request_command(args, service).await,
    }
}

async fn handle_login_command<T: Transport>(
    args: LoginArgs,
    service: &AuthService<T>,
) -> Result<(), AppError> {
    let username = match args.username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = rpassword::prompt_password("Password: ").map_err(|e| AuthError::Input {
        reason: e.to_string(),
    })?;

    let credentials = LoginCredentials {
        username,
        password: SecretString::new(password),
    };
    let user = service.login(&credentials).await?;

    println!("Logged in as {}.", display_name(&user));
    Ok(())
}

async fn handle_logout_command<T: Transport>(service: &AuthService<T>) -> Result<(), AppError> {
    service.logout().await;
    println!("Logged out.");
    Ok(())
}

async fn handle_whoami_command<T: Transport>(service: &AuthService<T>) -> Result<(), AppError> {
    if let GuardDecision::RedirectToLogin { .. } =
        require_auth(service.credentials().as_ref(), "whoami")
    {
        return Err(AuthError::NotAuthenticated.into());
    }

    let user = service.current_user().await?;
    print_user(&user);
    Ok(())
}

fn handle_status_command<T: Transport>(service: &AuthService<T>) -> Result<(), AppError> {
    let store = service.credentials();

    println!("Backoffice Client - Session Status");
    println!("==================================");
    println!(
        "Authenticated: {}",
        if store.is_authenticated() { "Yes" } else { "No" }
    );
    match store.access_token() {
        Some(token) => println!("Access token: {}", token_preview(&token)),
        None => println!("Access token: none"),
    }
    println!(
        "Refresh token: {}",
        if store.refresh_token().is_some() {
            "stored"
        } else {
            "none"
        }
    );
    if let Some(user) = store.user() {
        println!("User: {}", display_name(&user));
        if !user.roles.is_empty() {
            println!("Roles: {}", user.roles.join(", "));
        }
    }

    Ok(())
}

async fn handle_verify_command<T: Transport>(service: &AuthService<T>) -> Result<(), AppError> {
    if service.verify_token().await {
        println!("Token is valid.");
        Ok(())
    } else {
        Err(AppError::Generic {
            message: "Token is not valid.".to_string(),
        })
    }
}

async fn handle_request_command<T: Transport>(
    args: RequestArgs,
    service: &AuthService<T>,
) -> Result<(), AppError> {
    let method = parse_method(&args.method)?;
    let mut request = ApiRequest::new(method, args.path);
    if let Some(data) = args.data {
        let body: serde_json::Value = serde_json::from_str(&data).map_err(|e| AppError::Generic {
            message: format!("--data is not valid JSON: {}", e),
        })?;
        request = request.with_body(body);
    }

    let response = service.dispatcher().dispatch(request).await?;

    eprintln!("{}", response.status());
    match response.json::<serde_json::Value>() {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        ),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

fn parse_method(method: &str) -> Result<Method, AppError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| AppError::Generic {
        message: format!("Invalid HTTP method '{}'", method),
    })
}

fn prompt(label: &str) -> Result<String, AuthError> {
    let input_error = |e: std::io::Error| AuthError::Input {
        reason: e.to_string(),
    };

    print!("{}", label);
    std::io::stdout().flush().map_err(input_error)?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).map_err(input_error)?;
    Ok(line.trim().to_string())
}

fn display_name(user: &User) -> String {
    match &user.full_name {
        Some(full_name) => format!("{} ({})", full_name, user.username),
        None => user.username.clone(),
    }
}

fn print_user(user: &User) {
    if let Some(id) = &user.id {
        println!("ID: {}", id);
    }
    println!("Username: {}", user.username);
    if let Some(full_name) = &user.full_name {
        println!("Name: {}", full_name);
    }
    if let Some(email) = &user.email {
        println!("Email: {}", email);
    }
    if !user.roles.is_empty() {
        println!("Roles: {}", user.roles.join(", "));
    }
    if !user.permissions.is_empty() {
        println!("Permissions: {}", user.permissions.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("Patch").unwrap(), Method::PATCH);
        assert!(parse_method("not a method").is_err());
    }

    #[test]
    fn test_parse_request_command() {
        let cli = Cli::try_parse_from([
            "backoffice",
            "--log-level",
            "debug",
            "request",
            "POST",
            "/menus",
            "--data",
            r#"{"name":"Home"}"#,
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Request(args) => {
                assert_eq!(args.method, "POST");
                assert_eq!(args.path, "/menus");
                assert_eq!(args.data.as_deref(), Some(r#"{"name":"Home"}"#));
            }
            _ => panic!("expected request command"),
        }
    }

    #[test]
    fn test_display_name() {
        let user: User = serde_json::from_value(serde_json::json!({
            "username": "ana",
            "full_name": "Ana Diaz"
        }))
        .unwrap();
        assert_eq!(display_name(&user), "Ana Diaz (ana)");
    }
}
