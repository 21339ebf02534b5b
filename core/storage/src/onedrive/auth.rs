//! OAuth2 authentication and token management for OneDrive.
//!
//! [`TokenProvider`] is the piece the drive client talks to. It sits on top of
//! an [`IdentityClient`], which knows how to obtain tokens silently (from a
//! cached account) or interactively (by involving the user).
//! [`OAuthIdentityClient`] is the stock identity client: authorization code
//! flow with PKCE against the Microsoft identity platform.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthType, AuthUrl, AuthorizationCode, ClientId, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroize;

use drivelink_common::{Error, Result};

/// Microsoft identity platform authority for personal and work accounts.
const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";
/// Redirect URI registered for native clients.
const DEFAULT_REDIRECT_URL: &str = "https://login.microsoftonline.com/common/oauth2/nativeclient";

/// Scopes every drive call needs.
pub const GRAPH_SCOPES: [&str; 3] = [
    "https://graph.microsoft.com/User.Read",
    "https://graph.microsoft.com/Files.ReadWrite",
    "https://graph.microsoft.com/Files.ReadWrite.AppFolder",
];

/// Requested alongside the Graph scopes so a refresh token is issued.
const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// A cached token is reused only while it has at least this much life left.
pub fn freshness_window() -> Duration {
    Duration::minutes(5)
}

type GraphOAuthClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Bearer secret that is wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

/// A bearer token with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    access_token: AccessToken,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: AccessToken::new(access_token),
            expires_at,
        }
    }

    /// The bearer string for the `Authorization` header.
    pub fn secret(&self) -> &str {
        self.access_token.secret()
    }

    /// Check if the token expires within `window` from now.
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at <= Utc::now() + window
    }
}

/// A signed-in identity known to the identity client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Identifier assigned when the account was first signed in.
    pub id: String,
    /// Display name, when the identity provider reported one.
    #[serde(default)]
    pub username: Option<String>,
}

/// Source of tokens and accounts, typically backed by an OAuth2 library.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Accounts currently cached, oldest first.
    async fn accounts(&self) -> Vec<Account>;

    /// Obtain a token for `account` without user interaction.
    async fn acquire_token_silent(&self, scopes: &[String], account: &Account) -> Result<Token>;

    /// Obtain a token by involving the user. Adds the account on success.
    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<Token>;

    /// Forget an account and everything cached for it.
    async fn remove_account(&self, account: &Account) -> Result<()>;
}

/// Anything that can hand out a bearer string for a request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A fixed bearer token, for callers that obtain tokens elsewhere.
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.secret().to_string())
    }
}

/// Token cache for the single signed-in account.
///
/// Acquisition runs under one lock: concurrent callers queue behind the
/// first, so at most one interactive prompt is ever in flight and the cache
/// is written by one caller at a time.
pub struct TokenProvider {
    identity: Arc<dyn IdentityClient>,
    scopes: Vec<String>,
    cached: Mutex<Option<Token>>,
}

impl TokenProvider {
    /// Create a provider requesting [`GRAPH_SCOPES`].
    pub fn new(identity: Arc<dyn IdentityClient>) -> Self {
        Self::with_scopes(identity, GRAPH_SCOPES.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_scopes(identity: Arc<dyn IdentityClient>, scopes: Vec<String>) -> Self {
        Self {
            identity,
            scopes,
            cached: Mutex::new(None),
        }
    }

    /// Get a token for the signed-in account.
    ///
    /// Silent acquisition is always tried first and its result replaces the
    /// cache. When it fails for any reason, a cached token with more than
    /// [`freshness_window`] left is reused; otherwise the user is asked to
    /// sign in interactively.
    ///
    /// # Errors
    /// - `Authentication` if both silent and interactive acquisition fail
    pub async fn get_token(&self) -> Result<Token> {
        let mut cached = self.cached.lock().await;

        match self.acquire_silent().await {
            Ok(token) => {
                debug!(expires_at = %token.expires_at, "Token acquired silently");
                *cached = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Silent token acquisition failed");

                if let Some(token) = cached.as_ref() {
                    if !token.expires_within(freshness_window()) {
                        debug!("Reusing cached token");
                        return Ok(token.clone());
                    }
                }

                info!("Starting interactive sign-in");
                let token = self
                    .identity
                    .acquire_token_interactive(&self.scopes)
                    .await?;
                *cached = Some(token.clone());
                Ok(token)
            }
        }
    }

    async fn acquire_silent(&self) -> Result<Token> {
        let account = self
            .identity
            .accounts()
            .await
            .into_iter()
            .next()
            .ok_or_else(|| Error::Authentication("No cached account".to_string()))?;

        self.identity
            .acquire_token_silent(&self.scopes, &account)
            .await
    }

    /// Remove every cached account and clear the cached token.
    ///
    /// Safe to call when nobody is signed in.
    pub async fn sign_out(&self) -> Result<()> {
        let mut cached = self.cached.lock().await;
        *cached = None;

        for account in self.identity.accounts().await {
            self.identity.remove_account(&account).await?;
        }

        info!("Signed out");
        Ok(())
    }

    /// Currently cached token, if any.
    pub async fn cached_token(&self) -> Option<Token> {
        self.cached.lock().await.clone()
    }
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn access_token(&self) -> Result<String> {
        let token = self.get_token().await?;
        Ok(token.secret().to_string())
    }
}

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Application (client) ID from the app registration.
    pub client_id: String,
    /// Authority base, e.g. `https://login.microsoftonline.com/common`.
    pub authority: String,
    /// Redirect URL registered for the application.
    pub redirect_url: String,
    /// Scopes requested on every acquisition.
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authority: DEFAULT_AUTHORITY.to_string(),
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
            scopes: GRAPH_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Tokens returned by one exchange with the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: Token,
    pub refresh_token: Option<String>,
}

/// An authorization request waiting for the user's answer.
pub struct PendingAuthorization {
    /// URL the user must open.
    pub url: Url,
    csrf_state: CsrfToken,
    pkce_verifier: PkceCodeVerifier,
}

/// OAuth2 protocol helper for the Microsoft identity platform.
pub struct AuthManager {
    client: GraphOAuthClient,
    http: reqwest::Client,
}

impl AuthManager {
    /// Create a new authentication manager.
    ///
    /// # Errors
    /// - Empty client ID
    /// - Malformed authority or redirect URL
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::InvalidInput("Client ID cannot be empty".to_string()));
        }

        let authority = config.authority.trim_end_matches('/');
        let auth_url = AuthUrl::new(format!("{}/oauth2/v2.0/authorize", authority))
            .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(format!("{}/oauth2/v2.0/token", authority))
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?;
        let redirect_url = RedirectUrl::new(config.redirect_url.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?;

        // Public client: the client id travels in the request body, no secret.
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, http })
    }

    fn scopes_with_offline(scopes: &[String]) -> Vec<Scope> {
        let mut out: Vec<Scope> = scopes.iter().cloned().map(Scope::new).collect();
        if !scopes.iter().any(|s| s == OFFLINE_ACCESS_SCOPE) {
            out.push(Scope::new(OFFLINE_ACCESS_SCOPE.to_string()));
        }
        out
    }

    /// Build the authorization URL for the user to visit.
    pub fn authorization_request(&self, scopes: &[String]) -> PendingAuthorization {
        let (challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, csrf_state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(Self::scopes_with_offline(scopes))
            .set_pkce_challenge(challenge)
            .url();

        PendingAuthorization {
            url,
            csrf_state,
            pkce_verifier,
        }
    }

    /// Exchange the user's answer to a pending authorization for tokens.
    ///
    /// `response` is either the full redirect URL or the bare code.
    ///
    /// # Errors
    /// - The redirect carries an error or a mismatched state
    /// - Token exchange failed
    pub async fn complete_authorization(
        &self,
        pending: PendingAuthorization,
        response: &str,
    ) -> Result<TokenGrant> {
        let code = parse_authorization_response(response, pending.csrf_state.secret())?;

        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pending.pkce_verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        Ok(Self::grant_from(
            token_result.access_token().secret().clone(),
            token_result.refresh_token().map(|t| t.secret().clone()),
            token_result.expires_in(),
        ))
    }

    /// Refresh an access token using a refresh token.
    ///
    /// # Errors
    /// - Invalid or revoked refresh token
    /// - Network errors
    pub async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenGrant> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .add_scopes(Self::scopes_with_offline(scopes))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        // The endpoint may rotate the refresh token or leave it out.
        let new_refresh_token = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(Self::grant_from(
            token_result.access_token().secret().clone(),
            Some(new_refresh_token),
            token_result.expires_in(),
        ))
    }

    fn grant_from(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<std::time::Duration>,
    ) -> TokenGrant {
        let now = Utc::now();
        // The server picks `expires_in`; anything past chrono's range falls
        // back to one hour.
        let expires_at = expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or_else(|| now + Duration::hours(1));

        TokenGrant {
            token: Token::new(access_token, expires_at),
            refresh_token,
        }
    }
}

/// Extract the authorization code from what the user pasted back.
///
/// Accepts the full redirect URL (the `state` parameter, when present, must
/// match `expected_state`) or the bare code.
pub fn parse_authorization_response(response: &str, expected_state: &str) -> Result<String> {
    let response = response.trim();
    if response.is_empty() {
        return Err(Error::Authentication(
            "No authorization response provided".to_string(),
        ));
    }

    let url = match Url::parse(response) {
        Ok(url) => url,
        Err(_) => return Ok(response.to_string()),
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(Error::Authentication(match error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        }));
    }

    if let Some(state) = state {
        if state != expected_state {
            return Err(Error::Authentication(
                "Authorization state mismatch".to_string(),
            ));
        }
    }

    code.ok_or_else(|| Error::Authentication("Redirect URL has no code parameter".to_string()))
}

/// Presents the authorization URL to the user and returns their answer.
#[async_trait]
pub trait InteractiveDelegate: Send + Sync {
    /// Show `url` to the user; return the redirect URL or code they end up with.
    async fn authorize(&self, url: &Url) -> Result<String>;
}

struct AccountEntry {
    account: Account,
    refresh_token: Option<String>,
    token: Option<Token>,
}

/// [`IdentityClient`] backed by the `oauth2` crate.
///
/// Accounts and their tokens live only in memory.
pub struct OAuthIdentityClient {
    manager: AuthManager,
    delegate: Arc<dyn InteractiveDelegate>,
    accounts: RwLock<Vec<AccountEntry>>,
}

impl OAuthIdentityClient {
    pub fn new(manager: AuthManager, delegate: Arc<dyn InteractiveDelegate>) -> Self {
        Self {
            manager,
            delegate,
            accounts: RwLock::new(Vec::new()),
        }
    }

    /// Build from configuration.
    pub fn from_config(config: AuthConfig, delegate: Arc<dyn InteractiveDelegate>) -> Result<Self> {
        Ok(Self::new(AuthManager::new(&config)?, delegate))
    }
}

#[async_trait]
impl IdentityClient for OAuthIdentityClient {
    async fn accounts(&self) -> Vec<Account> {
        self.accounts
            .read()
            .await
            .iter()
            .map(|entry| entry.account.clone())
            .collect()
    }

    async fn acquire_token_silent(&self, scopes: &[String], account: &Account) -> Result<Token> {
        let mut accounts = self.accounts.write().await;
        let entry = accounts
            .iter_mut()
            .find(|entry| entry.account.id == account.id)
            .ok_or_else(|| Error::Authentication(format!("Unknown account: {}", account.id)))?;

        if let Some(token) = entry.token.as_ref() {
            if !token.expires_within(freshness_window()) {
                return Ok(token.clone());
            }
        }

        let refresh_token = entry.refresh_token.clone().ok_or_else(|| {
            Error::Authentication("No refresh token; interactive sign-in required".to_string())
        })?;

        info!("Refreshing expired access token");
        let grant = self.manager.refresh(&refresh_token, scopes).await?;

        entry.refresh_token = grant.refresh_token;
        entry.token = Some(grant.token.clone());
        Ok(grant.token)
    }

    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<Token> {
        let pending = self.manager.authorization_request(scopes);
        let response = self.delegate.authorize(&pending.url).await?;
        let grant = self.manager.complete_authorization(pending, &response).await?;

        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            username: None,
        };
        debug!(account = %account.id, "Interactive sign-in completed");

        // Only one account is active at a time.
        let mut accounts = self.accounts.write().await;
        accounts.clear();
        accounts.push(AccountEntry {
            account,
            refresh_token: grant.refresh_token,
            token: Some(grant.token.clone()),
        });

        Ok(grant.token)
    }

    async fn remove_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .await
            .retain(|entry| entry.account.id != account.id);
        Ok(())
    }
}
