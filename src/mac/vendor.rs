//! Vendor lookup for MAC addresses.
//!
//! Sources are consulted in a fixed order: the local OUI table first, then
//! `api.macvendors.com`, then `api.maclookup.app`. The first non-empty answer
//! wins; if every source fails or has no answer the lookup returns
//! [`UNKNOWN_VENDOR`]. When every remote service errored the answer is still
//! [`UNKNOWN_VENDOR`] but a warning is logged. There is no caching and no
//! retry.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, sync::Arc};
use tracing::{debug, instrument, warn};

use super::MacAddress;

pub const UNKNOWN_VENDOR: &str = "Desconocido";
pub const DEFAULT_MACVENDORS_URL: &str = "https://api.macvendors.com";
pub const DEFAULT_MACLOOKUP_URL: &str = "https://api.maclookup.app";

const BUILTIN_OUI: &[(&str, &str)] = &[
    ("000C29", "VMware, Inc."),
    ("001422", "Dell Inc."),
    ("00155D", "Microsoft Corporation"),
    ("080027", "PCS Systemtechnik GmbH"),
    ("B827EB", "Raspberry Pi Foundation"),
];

#[async_trait]
pub trait VendorSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Network-backed sources count towards outage detection.
    fn is_remote(&self) -> bool {
        true
    }

    /// `Ok(None)` means the source answered but does not know the prefix.
    async fn lookup(&self, mac: &MacAddress) -> Result<Option<String>>;
}

/// In-memory OUI prefix table.
#[derive(Debug, Clone, Default)]
pub struct OuiTable {
    entries: HashMap<String, String>,
}

impl OuiTable {
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_OUI
                .iter()
                .map(|(prefix, vendor)| ((*prefix).to_string(), (*vendor).to_string()))
                .collect(),
        }
    }

    /// Merge entries from a `PREFIX,Vendor` CSV file. Blank lines and lines
    /// starting with `#` are ignored.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is malformed.
    pub fn load_csv(mut self, path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read OUI file: {}", path.display()))?;
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (prefix, vendor) = line
                .split_once(',')
                .ok_or_else(|| anyhow!("OUI file line {}: expected PREFIX,Vendor", index + 1))?;
            let prefix = normalize_prefix(prefix)
                .ok_or_else(|| anyhow!("OUI file line {}: invalid prefix", index + 1))?;
            let vendor = vendor.trim().trim_matches('"');
            if !vendor.is_empty() {
                self.entries.insert(prefix, vendor.to_string());
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, mac: &MacAddress) -> Option<&str> {
        self.entries.get(mac.oui()).map(String::as_str)
    }
}

fn normalize_prefix(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    (digits.len() == 6).then_some(digits)
}

#[async_trait]
impl VendorSource for OuiTable {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn lookup(&self, mac: &MacAddress) -> Result<Option<String>> {
        Ok(self.get(mac).map(str::to_string))
    }
}

/// `GET {base}/{mac}`; plain-text vendor name, 404 when unknown.
#[derive(Debug, Clone)]
pub struct MacVendorsSource {
    client: Client,
    base_url: String,
}

impl MacVendorsSource {
    #[must_use]
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VendorSource for MacVendorsSource {
    fn name(&self) -> &'static str {
        "macvendors"
    }

    async fn lookup(&self, mac: &MacAddress) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, mac.formatted()))
            .send()
            .await
            .context("macvendors request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.text().await?;
                let vendor = body.trim();
                Ok((!vendor.is_empty()).then(|| vendor.to_string()))
            }
            status => Err(anyhow!("macvendors returned {status}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MacLookupResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    company: String,
}

/// `GET {base}/v2/macs/{mac}`; JSON body with `found` and `company`.
#[derive(Debug, Clone)]
pub struct MacLookupSource {
    client: Client,
    base_url: String,
}

impl MacLookupSource {
    #[must_use]
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VendorSource for MacLookupSource {
    fn name(&self) -> &'static str {
        "maclookup"
    }

    async fn lookup(&self, mac: &MacAddress) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/v2/macs/{}", self.base_url, mac.as_str()))
            .send()
            .await
            .context("maclookup request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("maclookup returned {status}"));
        }

        let body: MacLookupResponse = response
            .json()
            .await
            .context("maclookup returned invalid JSON")?;
        if !body.success {
            return Err(anyhow!("maclookup reported failure"));
        }
        let company = body.company.trim();
        Ok((body.found && !company.is_empty()).then(|| company.to_string()))
    }
}

/// Ordered chain of vendor sources.
#[derive(Clone)]
pub struct VendorLookup {
    sources: Vec<Arc<dyn VendorSource>>,
}

impl VendorLookup {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn VendorSource>>) -> Self {
        Self { sources }
    }

    /// Local table, then macvendors, then maclookup.
    #[must_use]
    pub fn standard(table: OuiTable, client: &Client, macvendors_url: &str, maclookup_url: &str) -> Self {
        Self::new(vec![
            Arc::new(table),
            Arc::new(MacVendorsSource::new(client.clone(), macvendors_url)),
            Arc::new(MacLookupSource::new(client.clone(), maclookup_url)),
        ])
    }

    /// First non-empty vendor name, or [`UNKNOWN_VENDOR`].
    #[instrument(skip(self, mac), fields(mac = %mac))]
    pub async fn lookup(&self, mac: &MacAddress) -> String {
        let mut remote = 0usize;
        let mut remote_failures = 0usize;
        for source in &self.sources {
            if source.is_remote() {
                remote += 1;
            }
            match source.lookup(mac).await {
                Ok(Some(vendor)) => {
                    debug!(source = source.name(), vendor = %vendor, "vendor resolved");
                    return vendor;
                }
                Ok(None) => debug!(source = source.name(), "vendor not known by source"),
                Err(err) => {
                    if source.is_remote() {
                        remote_failures += 1;
                    }
                    debug!(source = source.name(), error = %err, "vendor source failed");
                }
            }
        }

        if remote > 0 && remote_failures == remote {
            warn!(mac = %mac, "every remote vendor source failed; answering {UNKNOWN_VENDOR}");
        }
        UNKNOWN_VENDOR.to_string()
    }
}

impl std::fmt::Debug for VendorLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|source| source.name()).collect();
        f.debug_struct("VendorLookup").field("sources", &names).finish()
    }
}
