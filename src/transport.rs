//! Command transport: one authenticated POST per command.
//!
//! Every cursor operation goes through [`CommandTransport`]. The HTTP
//! implementation encodes the body as canonical extended JSON, posts it to the
//! proxy and unwraps the `{success, data, message}` envelope of the reply.

use crate::client::ClientOptions;
use crate::ejson;
use crate::error::{MongoError, Result};
use async_trait::async_trait;
use bson::{Bson, Document};
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, warn};
use url::Url;

/// Content type used for request and response bodies.
pub const EJSON_CONTENT_TYPE: &str = "application/ejson";

/// Header carrying the tenant identity expected by the proxy.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Something that can execute a proxy command.
///
/// Implementations send `params` (with `options` inserted under the
/// `options` key when present) to `path` and return the `data` field of a
/// successful reply.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Execute a single command.
    async fn send_command(
        &self,
        path: &str,
        params: Document,
        options: Option<Document>,
    ) -> Result<Bson>;
}

/// Build the proxy path for a collection command, e.g. `/v1/collection/users/find`.
pub fn collection_path(collection: &str, command: &str) -> String {
    format!("/v1/collection/{}/{}", collection, command)
}

/// Merge command parameters and options into the request body.
pub fn command_body(mut params: Document, options: Option<Document>) -> Document {
    if let Some(options) = options {
        params.insert("options", options);
    }
    params
}

/// Unwrap a proxy reply.
///
/// A non-2xx status or an envelope whose `success` flag is not `true` becomes
/// [`MongoError::Command`]; otherwise the `data` field is returned.
pub fn decode_envelope(status: u16, body: &str) -> Result<Bson> {
    let envelope = ejson::decode_document(body);

    if !(200..300).contains(&status) {
        let message = envelope
            .ok()
            .and_then(|env| env.get_str("message").ok().map(str::to_string))
            .unwrap_or_else(|| body.to_string());
        return Err(MongoError::command(status, message));
    }

    let mut envelope = envelope?;
    if !matches!(envelope.get("success"), Some(Bson::Boolean(true))) {
        let message = envelope
            .get_str("message")
            .unwrap_or("command failed")
            .to_string();
        warn!(status, %message, "proxy reported failure");
        return Err(MongoError::command(status, message));
    }

    Ok(envelope.remove("data").unwrap_or(Bson::Null))
}

/// HTTP implementation of [`CommandTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    options: ClientOptions,
}

impl HttpTransport {
    /// Create a transport for the proxy at `base_url`.
    pub fn new(base_url: &str, options: ClientOptions) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(MongoError::invalid_argument(format!(
                "unsupported scheme: {}",
                base_url.scheme()
            )));
        }
        base_url.set_query(None);
        // Credentials travel in the authorization header, never in the URL.
        let _ = base_url.set_username("");
        let _ = base_url.set_password(None);

        let mut builder = reqwest::Client::builder();
        if let Some(timeout_ms) = options.timeout_ms {
            builder = builder.timeout(std::time::Duration::from_millis(timeout_ms));
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url,
            options,
        })
    }

    /// Get the proxy base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a command path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        let base_path = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{}/{}", base_path, path.trim_start_matches('/')));
        Ok(url)
    }

    fn user_agent(&self) -> String {
        match self.options.app_name {
            Some(ref app) => format!("mongo-http/{} ({})", crate::version(), app),
            None => format!("mongo-http/{}", crate::version()),
        }
    }
}

#[async_trait]
impl CommandTransport for HttpTransport {
    async fn send_command(
        &self,
        path: &str,
        params: Document,
        options: Option<Document>,
    ) -> Result<Bson> {
        let url = self.endpoint(path)?;
        let payload = ejson::encode_document(&command_body(params, options))?;
        debug!(%url, bytes = payload.len(), "sending command");

        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, EJSON_CONTENT_TYPE)
            .header(ACCEPT, EJSON_CONTENT_TYPE)
            .header(USER_AGENT, self.user_agent())
            .body(payload);
        if let Some(ref tenant) = self.options.tenant {
            request = request.header(TENANT_HEADER, tenant);
        }
        if let Some(ref username) = self.options.username {
            request = request.basic_auth(username, self.options.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, bytes = body.len(), "received reply");

        decode_envelope(status, &body)
    }
}
