use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use cookie_store::{CookieDomain, CookieExpiration, CookieStore, RawCookie};
use reqwest_cookie_store::CookieStoreMutex;
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{CatalogError, Result};

/// One persisted cookie, in the tab-separated Netscape cookie-file layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub expires: Option<i64>,
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(domain: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            include_subdomains: domain.starts_with('.'),
            domain,
            path: "/".to_string(),
            secure: true,
            expires: None,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn to_line(&self) -> String {
        let flag = |b: bool| if b { "TRUE" } else { "FALSE" };
        [
            self.domain.as_str(),
            flag(self.include_subdomains),
            self.path.as_str(),
            flag(self.secure),
            &self.expires.map(|e| e.to_string()).unwrap_or_default(),
            self.name.as_str(),
            self.value.as_str(),
        ]
        .join("\t")
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let [domain, sub, path, secure, expires, name, value] = fields.as_slice() else { return None };
        Some(Self {
            domain: domain.to_string(),
            include_subdomains: sub.eq_ignore_ascii_case("TRUE"),
            path: path.to_string(),
            secure: secure.eq_ignore_ascii_case("TRUE"),
            expires: expires.parse().ok(),
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    fn origin(&self) -> Option<Url> {
        let host = self.domain.trim_start_matches('.');
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{host}{}", self.path)).ok()
    }

    fn to_raw(&self) -> RawCookie<'static> {
        let mut raw = RawCookie::new(self.name.clone(), self.value.clone());
        raw.set_path(self.path.clone());
        raw.set_secure(self.secure);
        if self.include_subdomains {
            raw.set_domain(self.domain.trim_start_matches('.').to_string());
        }
        if let Some(at) = self.expires.and_then(|e| OffsetDateTime::from_unix_timestamp(e).ok()) {
            raw.set_expires(at);
        }
        raw
    }

    /// `None` for cookies without a usable domain.
    fn from_stored(stored: &cookie_store::Cookie<'_>) -> Option<Self> {
        let (domain, include_subdomains) = match &stored.domain {
            CookieDomain::HostOnly(host) => (host.clone(), false),
            CookieDomain::Suffix(suffix) => (format!(".{suffix}"), true),
            CookieDomain::NotPresent | CookieDomain::Empty => return None,
        };
        let expires = match &stored.expires {
            CookieExpiration::AtUtc(at) => Some(at.unix_timestamp()),
            CookieExpiration::SessionEnd => None,
        };
        Some(Self {
            domain,
            include_subdomains,
            path: stored.path().unwrap_or("/").to_string(),
            secure: stored.secure().unwrap_or(false),
            expires,
            name: stored.name().to_string(),
            value: stored.value().to_string(),
        })
    }

    fn sort_key(&self) -> (&str, &str, &str) {
        (&self.domain, &self.path, &self.name)
    }
}

/// The process-wide HTTP session handed to provider collaborators.
///
/// Timeout, user agent, and retry count are fixed at startup. The client and
/// this session share one cookie store, so cookies set by servers are
/// persisted along with the ones added by hand.
pub struct Session {
    client: reqwest::Client,
    store: Arc<CookieStoreMutex>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Session {
    pub fn new(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(&settings.user_agent)
            .cookie_provider(store.clone())
            .build()
            .map_err(|e| CatalogError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client, store, max_retries: settings.max_retries, retry_delay: Duration::from_millis(500) })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn jar(&self) -> MutexGuard<'_, CookieStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false when the store rejected the cookie.
    pub fn add_cookie(&mut self, cookie: Cookie) -> bool {
        let Some(url) = cookie.origin() else {
            warn!(domain = %cookie.domain, "cookie domain is not a valid host");
            return false;
        };
        match self.jar().insert_raw(&cookie.to_raw(), &url) {
            Ok(_) => true,
            Err(e) => {
                warn!(domain = %cookie.domain, name = %cookie.name, error = %e, "cookie rejected");
                false
            }
        }
    }

    /// Unexpired cookies in domain, path, name order.
    pub fn cookies(&self) -> Vec<Cookie> {
        let mut out: Vec<Cookie> = self.jar().iter_unexpired().filter_map(Cookie::from_stored).collect();
        out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        out
    }

    pub fn clear_cookies(&mut self) {
        self.jar().clear();
    }

    /// Add every cookie line in `text`. Returns how many were kept.
    pub fn load_cookies(&mut self, text: &str) -> usize {
        let count = text.lines().filter_map(Cookie::parse_line).filter(|c| self.add_cookie(c.clone())).count();
        debug!(count, "loaded cookies");
        count
    }

    /// Canonical cookie-file payload of the current cookie set.
    pub fn cookie_text(&self) -> String {
        self.cookies().iter().map(|c| c.to_line() + "\n").collect()
    }

    /// GET `url` as text, retrying transport errors, 429 and 5xx responses.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let source = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_else(|| url.to_string());
        let mut attempt = 0;
        loop {
            let retryable = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.text().await.map_err(|e| CatalogError::fetch(&source, e));
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !(status.is_server_error() || status.as_u16() == 429) {
                        return Err(CatalogError::fetch(&source, format!("HTTP {status}")));
                    }
                    format!("HTTP {status}")
                }
                Err(e) => e.to_string(),
            };
            if attempt >= self.max_retries {
                return Err(CatalogError::fetch(&source, format!("{retryable} after {} attempts", attempt + 1)));
            }
            attempt += 1;
            warn!(url, attempt, error = %retryable, "request failed; retrying");
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}
