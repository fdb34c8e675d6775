//! Outbound fetch of a peer's currently published public key.
//!
//! Peers expose an XML-RPC endpoint; calling `system/keyswap` with our own
//! wwwroot and certificate returns theirs. The HTTP call is bounded by the
//! configured timeout and every failure maps to `DomainError::Network`.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;

use crate::domain::{Application, DomainError};
use crate::infrastructure::config::Config;

const KEYSWAP_METHOD: &str = "system/keyswap";
const USER_AGENT: &str = concat!("mnet-peers/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Ask `wwwroot` for the PEM certificate it currently publishes.
    async fn fetch_public_key(
        &self,
        wwwroot: &str,
        application: &Application,
    ) -> Result<String, DomainError>;

    /// Whether this fetcher can speak the XML-RPC keyswap protocol.
    fn speaks_xmlrpc(&self) -> bool {
        true
    }
}

pub struct XmlRpcKeyFetcher {
    client: reqwest::Client,
    local_wwwroot: String,
    local_public_key: String,
}

impl XmlRpcKeyFetcher {
    pub fn new(config: &Config) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.key_fetch_timeout)
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                DomainError::Precondition("nocurl")
            })?;

        Ok(Self {
            client,
            local_wwwroot: config.site_wwwroot.clone(),
            local_public_key: config.local_public_key.clone().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl KeyFetcher for XmlRpcKeyFetcher {
    async fn fetch_public_key(
        &self,
        wwwroot: &str,
        application: &Application,
    ) -> Result<String, DomainError> {
        let endpoint = format!("{}{}", wwwroot, application.xmlrpc_server_url);
        let body = keyswap_request(&self.local_wwwroot, &self.local_public_key, &application.name)?;

        tracing::debug!("keyswap with {}", endpoint);

        let response = self
            .client
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DomainError::Network(format!("timed out contacting {}", endpoint))
                } else {
                    DomainError::Network(format!("failed to contact {}: {}", endpoint, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(DomainError::Network(format!(
                "{} answered HTTP {}",
                endpoint,
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| DomainError::Network(format!("unreadable keyswap response: {}", e)))?;

        parse_keyswap_response(&text)
    }
}

/// Encode the `system/keyswap` methodCall.
pub fn keyswap_request(
    local_wwwroot: &str,
    local_public_key: &str,
    application: &str,
) -> Result<Vec<u8>, DomainError> {
    let encode_err = |e: quick_xml::Error| DomainError::Network(format!("xml encode: {}", e));
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(encode_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("methodCall")))
        .map_err(encode_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("methodName")))
        .map_err(encode_err)?;
    writer
        .write_event(Event::Text(BytesText::new(KEYSWAP_METHOD)))
        .map_err(encode_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("methodName")))
        .map_err(encode_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("params")))
        .map_err(encode_err)?;

    for param in [local_wwwroot, local_public_key, application] {
        for tag in ["param", "value", "string"] {
            writer
                .write_event(Event::Start(BytesStart::new(tag)))
                .map_err(encode_err)?;
        }
        writer
            .write_event(Event::Text(BytesText::new(param)))
            .map_err(encode_err)?;
        for tag in ["string", "value", "param"] {
            writer
                .write_event(Event::End(BytesEnd::new(tag)))
                .map_err(encode_err)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("params")))
        .map_err(encode_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("methodCall")))
        .map_err(encode_err)?;

    Ok(writer.into_inner().into_inner())
}

/// Extract the string returned by a keyswap methodResponse.
pub fn parse_keyswap_response(xml: &str) -> Result<String, DomainError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_fault = false;
    let mut in_value = false;
    let mut fault_text = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"fault" => in_fault = true,
                b"value" => in_value = true,
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"value" {
                    in_value = false;
                }
            }
            Ok(Event::Text(t)) if in_value => {
                let text = t
                    .unescape()
                    .map_err(|e| DomainError::Network(format!("bad keyswap payload: {}", e)))?;
                if in_fault {
                    fault_text.push(text.into_owned());
                } else if !text.trim().is_empty() {
                    return Ok(text.trim().to_string());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DomainError::Network(format!(
                    "malformed keyswap response: {}",
                    e
                )));
            }
        }
    }

    if in_fault {
        return Err(DomainError::Network(format!(
            "keyswap fault: {}",
            fault_text.join(" ")
        )));
    }

    Err(DomainError::Network(
        "keyswap response carried no key".to_string(),
    ))
}

/// Keys recently fetched from peers, keyed by wwwroot.
///
/// Entries are dropped when the host is committed again (see
/// `events::spawn_cache_invalidator`) or once they outlive the TTL.
#[derive(Clone)]
pub struct RemoteKeyCache {
    entries: Arc<DashMap<String, (String, Instant)>>,
    ttl: Duration,
}

impl RemoteKeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, wwwroot: &str) -> Option<String> {
        let fresh = self
            .entries
            .get(wwwroot)
            .filter(|entry| entry.1.elapsed() < self.ttl)
            .map(|entry| entry.0.clone());

        if fresh.is_none() {
            self.entries.remove(wwwroot);
        }
        fresh
    }

    pub fn put(&self, wwwroot: &str, pem: &str) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.1.elapsed() < ttl);
        self.entries
            .insert(wwwroot.to_string(), (pem.to_string(), Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&self, wwwroot: &str) {
        self.entries.remove(wwwroot);
    }

    /// Fetch through the cache.
    pub async fn fetch(
        &self,
        fetcher: &dyn KeyFetcher,
        wwwroot: &str,
        application: &Application,
    ) -> Result<String, DomainError> {
        if let Some(pem) = self.get(wwwroot) {
            return Ok(pem);
        }
        self.refresh(fetcher, wwwroot, application).await
    }

    /// Fetch from the peer regardless of what is cached, then cache it.
    pub async fn refresh(
        &self,
        fetcher: &dyn KeyFetcher,
        wwwroot: &str,
        application: &Application,
    ) -> Result<String, DomainError> {
        let pem = fetcher.fetch_public_key(wwwroot, application).await?;
        self.put(wwwroot, &pem);
        Ok(pem)
    }
}

impl Default for RemoteKeyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
