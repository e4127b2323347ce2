//! OTA image providers
//!
//! A provider lists upgrade images keyed by (manufacturer code, image
//! type, file version). The built-in kinds are a local directory scanner
//! and HTTP-backed JSON indexes: one per first-party manufacturer feed and
//! the Koenkk community aggregate. Ties between providers are broken by
//! priority: local directory > first-party > aggregate.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use zigbee_wire::{ImageKey, OtaImage};

/// Provider errors
#[derive(Error, Debug)]
pub enum OtaError {
    #[error("Image codec error: {0}")]
    Codec(#[from] zigbee_wire::CodecError),

    #[error("Image fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Tie-break order between providers offering the same file version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderPriority {
    Aggregate = 0,
    FirstParty = 1,
    LocalDirectory = 2,
}

/// A source of OTA images
#[async_trait]
pub trait OtaProvider: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> ProviderPriority;

    /// Re-read the provider's index
    async fn refresh(&self) -> Result<(), OtaError>;

    /// The best image this provider has for `key`, honoring the device's
    /// hardware version bounds
    async fn get_image(
        &self,
        key: ImageKey,
        hardware_version: Option<u16>,
    ) -> Result<Option<OtaImage>, OtaError>;
}

/// Scans a directory for `*.ota` / `*.zigbee` upgrade files
pub struct LocalDirProvider {
    dir: PathBuf,
    images: RwLock<HashMap<ImageKey, OtaImage>>,
}

impl LocalDirProvider {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            images: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OtaProvider for LocalDirProvider {
    fn name(&self) -> &str {
        "local-directory"
    }

    fn priority(&self) -> ProviderPriority {
        ProviderPriority::LocalDirectory
    }

    async fn refresh(&self) -> Result<(), OtaError> {
        let mut found = HashMap::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("OTA directory {:?} does not exist", self.dir);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ota") || ext.eq_ignore_ascii_case("zigbee"));
            if !is_image {
                continue;
            }
            let data = tokio::fs::read(&path).await?;
            match OtaImage::parse(&data) {
                Ok(image) => {
                    tracing::debug!(
                        "OTA file {:?}: mfr={:#06x} type={:#06x} version={:#010x}",
                        path.file_name(),
                        image.header.manufacturer_code,
                        image.header.image_type,
                        image.header.file_version
                    );
                    let key = image.key();
                    let newer = found
                        .get(&key)
                        .map_or(true, |existing: &OtaImage| {
                            existing.header.file_version < image.header.file_version
                        });
                    if newer {
                        found.insert(key, image);
                    }
                }
                Err(e) => tracing::warn!("Skipping unparseable OTA file {:?}: {}", path, e),
            }
        }
        tracing::info!("Local OTA directory holds {} images", found.len());
        *self.images.write().await = found;
        Ok(())
    }

    async fn get_image(
        &self,
        key: ImageKey,
        hardware_version: Option<u16>,
    ) -> Result<Option<OtaImage>, OtaError> {
        let images = self.images.read().await;
        Ok(images
            .get(&key)
            .filter(|image| image.should_update(0, hardware_version))
            .cloned())
    }
}

/// One row of a JSON firmware index
///
/// The field spellings cover the Koenkk aggregate and the first-party
/// feeds, which disagree on casing but not on content.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    #[serde(alias = "fileVersion", alias = "file_version")]
    pub file_version: u32,
    #[serde(alias = "manufacturerCode", alias = "manufacturer_code")]
    pub manufacturer_code: u16,
    #[serde(alias = "imageType", alias = "image_type")]
    pub image_type: u16,
    #[serde(alias = "url", alias = "binary_url", alias = "binaryUrl")]
    pub url: String,
    #[serde(
        default,
        alias = "minHardwareVersion",
        alias = "min_hardware_version"
    )]
    pub min_hardware_version: Option<u16>,
    #[serde(
        default,
        alias = "maxHardwareVersion",
        alias = "max_hardware_version"
    )]
    pub max_hardware_version: Option<u16>,
}

impl IndexEntry {
    fn key(&self) -> ImageKey {
        ImageKey {
            manufacturer_code: self.manufacturer_code,
            image_type: self.image_type,
        }
    }

    fn matches_hardware(&self, hardware_version: Option<u16>) -> bool {
        match hardware_version {
            None => true,
            Some(hw) => {
                self.min_hardware_version.map_or(true, |min| hw >= min)
                    && self.max_hardware_version.map_or(true, |max| hw <= max)
            }
        }
    }
}

/// Index documents are either a bare array or wrapped in a field
#[derive(Deserialize)]
#[serde(untagged)]
enum IndexDocument {
    Entries(Vec<IndexEntry>),
    Wrapped { images: Vec<IndexEntry> },
    Versions { versions: Vec<IndexEntry> },
}

impl IndexDocument {
    fn into_entries(self) -> Vec<IndexEntry> {
        match self {
            Self::Entries(entries) | Self::Wrapped { images: entries } => entries,
            Self::Versions { versions } => versions,
        }
    }
}

/// An HTTP-backed JSON firmware index
pub struct HttpIndexProvider {
    name: String,
    index_url: String,
    priority: ProviderPriority,
    /// Restrict the index to these manufacturer codes, if set
    manufacturer_codes: Option<Vec<u16>>,
    client: reqwest::Client,
    entries: RwLock<Vec<IndexEntry>>,
}

impl HttpIndexProvider {
    pub fn new(
        name: impl Into<String>,
        index_url: impl Into<String>,
        priority: ProviderPriority,
        manufacturer_codes: Option<Vec<u16>>,
    ) -> Self {
        Self {
            name: name.into(),
            index_url: index_url.into(),
            priority,
            manufacturer_codes,
            client: reqwest::Client::new(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// IKEA manufacturer code
    pub const IKEA: u16 = 4476;
    /// LEDVANCE/OSRAM manufacturer codes
    pub const LEDVANCE: [u16; 2] = [4489, 4364];
    /// Sonoff (ITead) manufacturer code
    pub const SONOFF: u16 = 4742;
    /// Inovelli manufacturer code
    pub const INOVELLI: u16 = 4655;
    /// Salus/Computime manufacturer code
    pub const SALUS: u16 = 4216;

    pub fn ikea() -> Self {
        Self::new(
            "ikea",
            "https://fw.ota.homesmart.ikea.com/DIRIGERA/version_info.json",
            ProviderPriority::FirstParty,
            Some(vec![Self::IKEA]),
        )
    }

    pub fn ledvance() -> Self {
        Self::new(
            "ledvance",
            "https://api.update.ledvance.com/v1/zigbee/firmwares/newest",
            ProviderPriority::FirstParty,
            Some(Self::LEDVANCE.to_vec()),
        )
    }

    pub fn sonoff() -> Self {
        Self::new(
            "sonoff",
            "https://zigbee-ota.sonoff.tech/releases/upgrade-list.json",
            ProviderPriority::FirstParty,
            Some(vec![Self::SONOFF]),
        )
    }

    pub fn inovelli() -> Self {
        Self::new(
            "inovelli",
            "https://files.inovelli.com/firmware/firmware-zha.json",
            ProviderPriority::FirstParty,
            Some(vec![Self::INOVELLI]),
        )
    }

    pub fn salus() -> Self {
        Self::new(
            "salus",
            "https://eu.salusconnect.io/demo/default/status/firmware",
            ProviderPriority::FirstParty,
            Some(vec![Self::SALUS]),
        )
    }

    /// The Koenkk community aggregate index
    pub fn koenkk() -> Self {
        Self::new(
            "koenkk",
            "https://raw.githubusercontent.com/Koenkk/zigbee-OTA/master/index.json",
            ProviderPriority::Aggregate,
            None,
        )
    }

    /// An extra aggregate index from configuration
    pub fn extra(url: String) -> Self {
        Self::new(
            format!("extra:{url}"),
            url,
            ProviderPriority::Aggregate,
            None,
        )
    }
}

#[async_trait]
impl OtaProvider for HttpIndexProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> ProviderPriority {
        self.priority
    }

    async fn refresh(&self) -> Result<(), OtaError> {
        let document: IndexDocument = self
            .client
            .get(&self.index_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut entries = document.into_entries();
        if let Some(codes) = &self.manufacturer_codes {
            entries.retain(|entry| codes.contains(&entry.manufacturer_code));
        }
        tracing::info!("Provider {} indexed {} images", self.name, entries.len());
        *self.entries.write().await = entries;
        Ok(())
    }

    async fn get_image(
        &self,
        key: ImageKey,
        hardware_version: Option<u16>,
    ) -> Result<Option<OtaImage>, OtaError> {
        let best = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|entry| entry.key() == key && entry.matches_hardware(hardware_version))
                .max_by_key(|entry| entry.file_version)
                .cloned()
        };
        let Some(entry) = best else {
            return Ok(None);
        };

        let data = self
            .client
            .get(&entry.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let image = OtaImage::parse(&data)?;
        if image.key() != key {
            tracing::warn!(
                "Provider {} served an image for the wrong key ({:?} != {:?})",
                self.name,
                image.key(),
                key
            );
            return Ok(None);
        }
        Ok(Some(image))
    }
}
