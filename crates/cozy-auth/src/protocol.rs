//! OAuth2 client protocol against the cozy authorization server
//!
//! Stateless request/response functions: dynamic client registration
//! (register, read, update, delete), authorization URL construction, and
//! the two token endpoint interactions (code exchange, refresh). Every call
//! goes through the injected `Transport`.
//!
//! Registration endpoint failures map to `Error::Registration`, token
//! endpoint failures to `Error::TokenExchange`. A transport failure (no
//! response, timeout) maps to the same variant as a server rejection.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::constants::{AUTHORIZE_PATH, REGISTER_PATH, TOKEN_PATH};
use crate::error::{Error, Result, ServerError};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, Url, endpoint};
use crate::types::{
    AccessToken, Client, ClientParams, ClientPatch, RegistrationResponse, TokenResponse, now_millis,
};

/// Register a new OAuth client (`POST /auth/register`).
pub async fn register_client(
    transport: &dyn Transport,
    base: &Url,
    params: &ClientParams,
) -> Result<Client> {
    if params.redirect_uris.is_empty() {
        return Err(Error::Configuration(
            "client params must include at least one redirect URI".into(),
        ));
    }
    let draft = Client::from_params(params);
    let request = HttpRequest::new(Method::POST, endpoint(base, REGISTER_PATH)?)
        .json(draft.registration_document().into());

    let response = call(transport, request, Error::Registration).await?;
    let body: RegistrationResponse = decode(&response, Error::Registration)?;
    if body.client_id.as_deref().is_none_or(str::is_empty) {
        return Err(Error::Registration(ServerError::malformed(
            response.status,
            "registration response has no client_id",
        )));
    }
    let client = draft.merged_with(body)?;
    info!(client_id = %client.client_id, "registered OAuth client");
    Ok(client)
}

/// Read a registration back (`GET /auth/register/{client_id}`).
pub async fn get_client(transport: &dyn Transport, base: &Url, client: &Client) -> Result<Client> {
    client.ensure_registered()?;
    let request = HttpRequest::new(Method::GET, client_endpoint(base, client)?)
        .bearer(&client.registration_access_token);

    let response = call(transport, request, Error::Registration).await?;
    let body: RegistrationResponse = decode(&response, Error::Registration)?;
    client.merged_with(body)
}

/// Update a registration (`PUT /auth/register/{client_id}`).
///
/// Rejected with `Error::Registration` when the registration token is
/// expired or the client was revoked.
pub async fn update_client(
    transport: &dyn Transport,
    base: &Url,
    client: &Client,
    patch: &ClientPatch,
) -> Result<Client> {
    client.ensure_registered()?;
    let patched = patch.apply(client);
    let mut document = patched.registration_document();
    document.insert("client_id".into(), patched.client_id.clone().into());
    if patch.reset_secret {
        document.insert("client_secret".into(), patched.client_secret.clone().into());
    }
    let request = HttpRequest::new(Method::PUT, client_endpoint(base, client)?)
        .bearer(&client.registration_access_token)
        .json(document.into());

    let response = call(transport, request, Error::Registration).await?;
    let body: RegistrationResponse = decode(&response, Error::Registration)?;
    let updated = patched.merged_with(body)?;
    info!(client_id = %updated.client_id, reset_secret = patch.reset_secret, "updated OAuth client");
    Ok(updated)
}

/// Delete a registration (`DELETE /auth/register/{client_id}`).
///
/// A client that is already gone (404/410) counts as success.
pub async fn unregister_client(transport: &dyn Transport, base: &Url, client: &Client) -> Result<()> {
    client.ensure_registered()?;
    let request = HttpRequest::new(Method::DELETE, client_endpoint(base, client)?)
        .bearer(&client.registration_access_token);

    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Registration(ServerError::transport(e.to_string())))?;
    match response.status {
        s if (200..300).contains(&s) => {
            info!(client_id = %client.client_id, "unregistered OAuth client");
            Ok(())
        }
        404 | 410 => {
            debug!(client_id = %client.client_id, "client already unregistered");
            Ok(())
        }
        status => Err(Error::Registration(ServerError::from_response(
            status,
            &response.body,
        ))),
    }
}

/// Build the authorization URL the user must open in a browser.
///
/// No network call. `state` is echoed back on the redirect and must be
/// checked by the caller (see `parse_redirect`).
pub fn get_auth_code_url(base: &Url, client: &Client, scopes: &[String], state: &str) -> Result<Url> {
    client.ensure_registered()?;
    let mut url = endpoint(base, AUTHORIZE_PATH)?;
    url.query_pairs_mut()
        .append_pair("client_id", &client.client_id)
        .append_pair("redirect_uri", client.redirect_uri()?)
        .append_pair("state", state)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes.join(" "));
    Ok(url)
}

/// Exchange an authorization code for tokens.
///
/// Codes are single-use: a replayed, expired or unknown code is rejected by
/// the server and surfaces as `Error::TokenExchange`.
pub async fn get_access_token(
    transport: &dyn Transport,
    base: &Url,
    client: &Client,
    code: &str,
) -> Result<AccessToken> {
    client.ensure_registered()?;
    let request = HttpRequest::new(Method::POST, endpoint(base, TOKEN_PATH)?).form(&[
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
    ]);

    let response = call(transport, request, Error::TokenExchange).await?;
    let token: TokenResponse = decode(&response, Error::TokenExchange)?;
    debug!(client_id = %client.client_id, "authorization code exchanged");
    Ok(token.into_access_token(now_millis(), None))
}

/// Obtain a new access token with the refresh token of `token`.
///
/// Returns a new value: the server may rotate the refresh token, so callers
/// must persist the result rather than the old token. A dead refresh token
/// is an `invalid_grant` token error and is not retried here.
pub async fn refresh_token(
    transport: &dyn Transport,
    base: &Url,
    client: &Client,
    token: &AccessToken,
) -> Result<AccessToken> {
    client.ensure_registered()?;
    let refresh = token
        .refresh_token
        .as_deref()
        .ok_or_else(|| Error::MissingCredential("access token has no refresh token".into()))?;
    let request = HttpRequest::new(Method::POST, endpoint(base, TOKEN_PATH)?).form(&[
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
    ]);

    let response = call(transport, request, Error::TokenExchange).await?;
    let refreshed: TokenResponse = decode(&response, Error::TokenExchange)?;
    debug!(client_id = %client.client_id, "access token refreshed");
    Ok(refreshed.into_access_token(now_millis(), Some(refresh.to_string())))
}

/// Extract the authorization code from the redirect the user landed on.
///
/// Fails when the server reported an error, when `state` does not match
/// the value sent on the authorization URL, or when no code is present.
pub fn parse_redirect(page_url: &Url, expected_state: &str) -> Result<String> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in page_url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(Error::InvalidRedirect(format!("authorization refused: {error}")));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(Error::InvalidRedirect("state mismatch".into()));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| Error::InvalidRedirect("redirect has no authorization code".into()))
}

/// Generate an opaque `state` value for CSRF protection.
///
/// 16 random bytes, URL-safe base64 without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `{base}/auth/register/{client_id}`, with the ID as a single path segment.
fn client_endpoint(base: &Url, client: &Client) -> Result<Url> {
    let mut url = endpoint(base, REGISTER_PATH)?;
    url.path_segments_mut()
        .map_err(|_| Error::Configuration(format!("base URL {base} cannot carry a path")))?
        .push(&client.client_id);
    Ok(url)
}

/// Send `request`, mapping transport failures and non-2xx statuses through `wrap`.
async fn call(
    transport: &dyn Transport,
    request: HttpRequest,
    wrap: fn(ServerError) -> Error,
) -> Result<HttpResponse> {
    let response = transport
        .send(request)
        .await
        .map_err(|e| wrap(ServerError::transport(e.to_string())))?;
    if !response.is_success() {
        return Err(wrap(ServerError::from_response(
            response.status,
            &response.body,
        )));
    }
    Ok(response)
}

fn decode<T: DeserializeOwned>(response: &HttpResponse, wrap: fn(ServerError) -> Error) -> Result<T> {
    response.json().map_err(|e| {
        wrap(ServerError::malformed(
            response.status,
            format!("invalid response: {e}"),
        ))
    })
}
