//! Interactive OAuth consent, run once to obtain a refresh token.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;
use uuid::Uuid;

use crate::config::GoogleSettings;

pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];

const REDIRECT_PORT: u16 = 8085;

pub fn redirect_uri() -> String {
    format!("http://localhost:{}/callback", REDIRECT_PORT)
}

pub fn redirect_address() -> String {
    format!("127.0.0.1:{}", REDIRECT_PORT)
}

/// Tokens granted for an authorization code
#[derive(Debug, Deserialize)]
pub struct GrantedTokens {
    pub access_token: String,
    /// Only issued with offline access and a fresh consent prompt
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: i64,
}

/// The consent page URL. Offline access with a forced prompt makes Google
/// issue a refresh token even for previously authorized clients.
pub fn consent_url(settings: &GoogleSettings, state: &str) -> Result<Url> {
    let mut url = Url::parse(&settings.auth_url)
        .with_context(|| format!("Invalid auth_url {}", settings.auth_url))?;

    url.query_pairs_mut()
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", &redirect_uri())
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("state", state);

    Ok(url)
}

/// Run the whole consent flow and return the granted refresh token.
pub async fn authorize(settings: &GoogleSettings) -> Result<String> {
    if settings.client_id.is_empty() || settings.client_secret.is_empty() {
        bail!("google.client_id and google.client_secret must be configured");
    }

    let state = Uuid::new_v4().to_string();
    let auth_url = consent_url(settings, &state)?;

    eprintln!("\nOpen this URL in your browser to authenticate:\n");
    eprintln!("{}\n", auth_url);

    // Try to open the browser automatically
    if open::that(auth_url.as_str()).is_err() {
        eprintln!("(Could not open browser automatically, please copy the URL above)");
    }

    let listener = TcpListener::bind(redirect_address())
        .await
        .context("Failed to bind OAuth callback listener")?;
    let code = wait_for_callback(&listener, &state).await?;

    eprintln!("\nReceived authorization code, exchanging for tokens...");

    let tokens = exchange_code(&reqwest::Client::new(), settings, &code).await?;
    tokens.refresh_token.context(
        "Google did not return a refresh token; revoke the app's access and try again",
    )
}

pub async fn exchange_code(
    http: &reqwest::Client,
    settings: &GoogleSettings,
    code: &str,
) -> Result<GrantedTokens> {
    let redirect_uri = redirect_uri();
    let response = http
        .post(&settings.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ])
        .send()
        .await
        .context("Failed to send token exchange request")?;

    if !response.status().is_success() {
        let error_text = response.text().await.unwrap_or_default();
        bail!("Failed to exchange authorization code: {}", error_text);
    }

    response
        .json()
        .await
        .context("Failed to parse token exchange response")
}

/// Outcome of the redirect back from the consent page
#[derive(Debug, PartialEq)]
enum Callback {
    Granted(String),
    Denied(String),
    Malformed(&'static str),
}

impl Callback {
    fn from_query(url: &Url, expected_state: &str) -> Self {
        let mut code = None;
        let mut state = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => return Callback::Denied(value.into_owned()),
                _ => {}
            }
        }

        match (code, state) {
            (_, None) => Callback::Malformed("missing state"),
            (_, Some(state)) if state != expected_state => Callback::Malformed("state mismatch"),
            (None, _) => Callback::Malformed("missing code"),
            (Some(code), _) => Callback::Granted(code),
        }
    }

    fn page(&self) -> (&'static str, String) {
        match self {
            Callback::Granted(_) => (
                "200 OK",
                "locsync is authorized. You can close this window.".to_string(),
            ),
            Callback::Denied(_) => ("403 Forbidden", "Access was denied.".to_string()),
            Callback::Malformed(reason) => ("400 Bad Request", format!("Unusable callback: {reason}.")),
        }
    }
}

/// Accept redirects until one reaches the callback path, answer the browser
/// and return the authorization code.
async fn wait_for_callback(listener: &TcpListener, expected_state: &str) -> Result<String> {
    let base = Url::parse(&redirect_uri())?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Failed to accept OAuth callback")?;
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .context("Failed to read OAuth callback request")?;
        // Drain the headers so closing the socket does not reset it
        let mut header = String::new();
        while reader.read_line(&mut header).await.unwrap_or(0) > 2 {
            header.clear();
        }

        let target = match request_line.trim_end().split(' ').collect::<Vec<_>>().as_slice() {
            ["GET", target, _version] => base.join(target).ok(),
            _ => None,
        };
        let mut stream = reader.into_inner();

        let callback = match target {
            Some(url) if url.path() == base.path() => Callback::from_query(&url, expected_state),
            // Favicon and other stray requests
            Some(_) => {
                respond(&mut stream, "404 Not Found", "Not found.").await?;
                continue;
            }
            None => Callback::Malformed("not an HTTP GET"),
        };

        let (status, message) = callback.page();
        respond(&mut stream, status, &message).await?;

        return match callback {
            Callback::Granted(code) => Ok(code),
            Callback::Denied(reason) => bail!("Authorization was denied: {}", reason),
            Callback::Malformed(reason) => bail!("Invalid OAuth callback: {}", reason),
        };
    }
}

async fn respond(stream: &mut TcpStream, status: &str, message: &str) -> Result<()> {
    let body = format!("<!doctype html><title>locsync</title><p>{message}</p>");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .context("Failed to answer OAuth callback")?;
    stream.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_consent_url_requests_offline_access() {
        let settings = GoogleSettings {
            client_id: "client-1".into(),
            ..GoogleSettings::default()
        };

        let url = consent_url(&settings, "xyz").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
        assert!(pairs.contains(&("prompt".into(), "consent".into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "http://localhost:8085/callback".into()
        )));
    }

    async fn visit(address: std::net::SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut page = String::new();
        stream.read_to_string(&mut page).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_callback_yields_code_after_stray_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            let favicon = visit(address, "/favicon.ico").await;
            let callback = visit(address, "/callback?code=4%2Fabc&state=xyz").await;
            (favicon, callback)
        });

        let code = wait_for_callback(&listener, "xyz").await.unwrap();

        assert_eq!(code, "4/abc");
        let (favicon, callback) = browser.await.unwrap();
        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(callback.starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_callback_with_foreign_state_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let browser =
            tokio::spawn(async move { visit(address, "/callback?code=c&state=other").await });

        let err = wait_for_callback(&listener, "xyz").await.unwrap_err();

        assert!(err.to_string().contains("state mismatch"));
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn test_denied_consent_wins_over_missing_code() {
        let url = Url::parse("http://localhost:8085/callback?error=access_denied&state=xyz").unwrap();
        assert_eq!(
            Callback::from_query(&url, "xyz"),
            Callback::Denied("access_denied".into())
        );

        let url = Url::parse("http://localhost:8085/callback?state=xyz").unwrap();
        assert_eq!(
            Callback::from_query(&url, "xyz"),
            Callback::Malformed("missing code")
        );
    }

    #[tokio::test]
    async fn test_exchange_returns_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "refresh_token": "1//rt",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let settings = GoogleSettings {
            client_id: "client".into(),
            client_secret: "secret".into(),
            token_url: format!("{}/token", server.uri()),
            ..GoogleSettings::default()
        };

        let tokens = exchange_code(&reqwest::Client::new(), &settings, "the-code")
            .await
            .unwrap();

        assert_eq!(tokens.refresh_token.as_deref(), Some("1//rt"));
    }
}
