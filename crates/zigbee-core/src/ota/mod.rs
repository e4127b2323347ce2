//! OTA upgrade engine
//!
//! The coordinator plays the OTA cluster (0x0019) server role. Devices
//! drive the protocol: Query-Next-Image selects a candidate through the
//! provider set, Image-Block requests stream it out, and Upgrade-End
//! finishes the exchange. Protocol failures leave the device on its old
//! firmware; the next query simply starts over.

pub mod provider;

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use zigbee_wire::ota_image::{
    command, ImageBlockRequest, ImageBlockResponse, QueryNextImage, QueryNextImageResponse,
    UpgradeEndRequest, UpgradeEndResponse,
};
use zigbee_wire::{Eui64, ImageKey, OtaImage};

use crate::config::OtaConfig;
pub use provider::{HttpIndexProvider, LocalDirProvider, OtaError, OtaProvider, ProviderPriority};

/// Largest data chunk handed out per Image-Block-Response
const MAX_BLOCK_SIZE: u8 = 64;

/// Per-device upgrade progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    Querying,
    Downloading,
    WaitingToApply,
    Applied,
    Failed,
}

#[derive(Debug, Clone)]
struct DeviceUpgrade {
    state: UpgradeState,
    key: ImageKey,
    file_version: u32,
    /// Highest offset served so far
    progress: u32,
}

/// A response frame the engine wants sent back to the device
#[derive(Debug, Clone)]
pub struct OtaReply {
    pub command_id: u8,
    pub payload: Vec<u8>,
}

/// A fetched image kept ready for block transfer
struct CachedImage {
    image: OtaImage,
    /// The serialized file, the byte stream devices download
    data: Bytes,
}

/// The OTA upgrade engine
pub struct OtaEngine {
    providers: Vec<Arc<dyn OtaProvider>>,
    cache: DashMap<ImageKey, Arc<CachedImage>>,
    devices: DashMap<Eui64, DeviceUpgrade>,
}

impl OtaEngine {
    pub fn new(providers: Vec<Arc<dyn OtaProvider>>) -> Self {
        Self {
            providers,
            cache: DashMap::new(),
            devices: DashMap::new(),
        }
    }

    /// Build the provider set from configuration
    pub fn from_config(config: &OtaConfig) -> Self {
        let mut providers: Vec<Arc<dyn OtaProvider>> = Vec::new();
        if let Some(dir) = &config.otau_directory {
            providers.push(Arc::new(LocalDirProvider::new(dir.clone())));
        }
        if config.ikea_provider {
            providers.push(Arc::new(HttpIndexProvider::ikea()));
        }
        if config.ledvance_provider {
            providers.push(Arc::new(HttpIndexProvider::ledvance()));
        }
        if config.sonoff_provider {
            providers.push(Arc::new(HttpIndexProvider::sonoff()));
        }
        if config.inovelli_provider {
            providers.push(Arc::new(HttpIndexProvider::inovelli()));
        }
        if config.salus_provider {
            providers.push(Arc::new(HttpIndexProvider::salus()));
        }
        for url in &config.extra_providers {
            providers.push(Arc::new(HttpIndexProvider::extra(url.clone())));
        }
        Self::new(providers)
    }

    /// Refresh every provider's index; failures are logged, not fatal
    pub async fn refresh(&self) {
        for provider in &self.providers {
            if let Err(e) = provider.refresh().await {
                tracing::warn!("OTA provider {} refresh failed: {}", provider.name(), e);
            }
        }
    }

    /// The upgrade state of a device, if it ever talked to the engine
    pub fn state(&self, ieee: Eui64) -> UpgradeState {
        self.devices
            .get(&ieee)
            .map(|d| d.state)
            .unwrap_or(UpgradeState::Idle)
    }

    /// Download progress: (bytes served, total bytes) of the active image
    pub fn progress(&self, ieee: Eui64) -> Option<(u32, u32)> {
        let upgrade = self.devices.get(&ieee)?;
        let cached = self.cache.get(&upgrade.key)?;
        if cached.image.header.file_version != upgrade.file_version {
            return None;
        }
        Some((upgrade.progress, cached.data.len() as u32))
    }

    /// Handle a cluster-specific OTA command from a device
    pub async fn handle_command(
        &self,
        ieee: Eui64,
        command_id: u8,
        payload: &[u8],
    ) -> Result<Option<OtaReply>, OtaError> {
        match command_id {
            command::QUERY_NEXT_IMAGE => {
                let query = QueryNextImage::parse(payload)?;
                Ok(Some(self.handle_query(ieee, query).await))
            }
            command::IMAGE_BLOCK_REQUEST => {
                let request = ImageBlockRequest::parse(payload)?;
                Ok(Some(self.handle_block_request(ieee, request)))
            }
            command::UPGRADE_END_REQUEST => {
                let request = UpgradeEndRequest::parse(payload)?;
                Ok(self.handle_upgrade_end(ieee, request))
            }
            other => {
                tracing::debug!("Unhandled OTA command {:#04x} from {}", other, ieee);
                Ok(None)
            }
        }
    }

    async fn handle_query(&self, ieee: Eui64, query: QueryNextImage) -> OtaReply {
        let key = query.key();
        tracing::info!(
            "OTA query from {}: mfr={:#06x} type={:#06x} version={:#010x}",
            ieee,
            key.manufacturer_code,
            key.image_type,
            query.current_file_version
        );
        self.devices.insert(
            ieee,
            DeviceUpgrade {
                state: UpgradeState::Querying,
                key,
                file_version: 0,
                progress: 0,
            },
        );

        let candidate = self
            .select_image(key, query.current_file_version, query.hardware_version)
            .await;
        let response = match candidate {
            Some(image) => {
                let file_version = image.header.file_version;
                let data = Bytes::from(image.serialize());
                let total = data.len() as u32;
                self.cache
                    .insert(key, Arc::new(CachedImage { image, data }));
                if let Some(mut upgrade) = self.devices.get_mut(&ieee) {
                    upgrade.state = UpgradeState::Downloading;
                    upgrade.file_version = file_version;
                }
                tracing::info!(
                    "OTA offering {} version {:#010x} ({} bytes)",
                    ieee,
                    file_version,
                    total
                );
                QueryNextImageResponse::available(key, file_version, total)
            }
            None => {
                if let Some(mut upgrade) = self.devices.get_mut(&ieee) {
                    upgrade.state = UpgradeState::Idle;
                }
                QueryNextImageResponse::no_image()
            }
        };
        OtaReply {
            command_id: command::QUERY_NEXT_IMAGE_RESPONSE,
            payload: response.serialize(),
        }
    }

    /// Ask every provider for a candidate; highest file version wins, then
    /// provider priority
    async fn select_image(
        &self,
        key: ImageKey,
        current_version: u32,
        hardware_version: Option<u16>,
    ) -> Option<OtaImage> {
        let mut best: Option<(u32, ProviderPriority, OtaImage)> = None;
        for provider in &self.providers {
            let image = match provider.get_image(key, hardware_version).await {
                Ok(Some(image)) => image,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("OTA provider {} lookup failed: {}", provider.name(), e);
                    continue;
                }
            };
            if !image.should_update(current_version, hardware_version) {
                continue;
            }
            let rank = (image.header.file_version, provider.priority());
            let better = best
                .as_ref()
                .map_or(true, |(version, priority, _)| rank > (*version, *priority));
            if better {
                best = Some((rank.0, rank.1, image));
            }
        }
        best.map(|(_, _, image)| image)
    }

    fn handle_block_request(&self, ieee: Eui64, request: ImageBlockRequest) -> OtaReply {
        let key = request.key();
        let no_image = || OtaReply {
            command_id: command::IMAGE_BLOCK_RESPONSE,
            payload: vec![0x98], // NO_IMAGE_AVAILABLE
        };

        let Some(cached) = self.cache.get(&key).map(|c| Arc::clone(&c)) else {
            tracing::warn!("OTA block request from {} for uncached image", ieee);
            return no_image();
        };
        if cached.image.header.file_version != request.file_version {
            return no_image();
        }

        let offset = request.file_offset as usize;
        if offset >= cached.data.len() {
            return no_image();
        }
        let size = usize::from(request.maximum_data_size.min(MAX_BLOCK_SIZE));
        let end = usize::min(offset + size, cached.data.len());
        let chunk = cached.data[offset..end].to_vec();

        if let Some(mut upgrade) = self.devices.get_mut(&ieee) {
            upgrade.state = UpgradeState::Downloading;
            upgrade.progress = end as u32;
        }
        tracing::debug!(
            "OTA block for {}: offset={} len={} of {}",
            ieee,
            offset,
            chunk.len(),
            cached.data.len()
        );

        let response = ImageBlockResponse {
            status: 0x00,
            key,
            file_version: request.file_version,
            file_offset: request.file_offset,
            data: chunk,
        };
        OtaReply {
            command_id: command::IMAGE_BLOCK_RESPONSE,
            payload: response.serialize(),
        }
    }

    fn handle_upgrade_end(&self, ieee: Eui64, request: UpgradeEndRequest) -> Option<OtaReply> {
        if request.status != 0x00 {
            tracing::warn!(
                "OTA upgrade on {} ended with status {:#04x}; device keeps old firmware",
                ieee,
                request.status
            );
            if let Some(mut upgrade) = self.devices.get_mut(&ieee) {
                upgrade.state = UpgradeState::Failed;
            }
            // The default-response path acknowledges the request
            return None;
        }

        if let Some(mut upgrade) = self.devices.get_mut(&ieee) {
            upgrade.state = UpgradeState::WaitingToApply;
        }
        // Apply immediately: current_time == upgrade_time == 0
        let response = UpgradeEndResponse {
            key: ImageKey {
                manufacturer_code: request.manufacturer_code,
                image_type: request.image_type,
            },
            file_version: request.file_version,
            current_time: 0,
            upgrade_time: 0,
        };
        if let Some(mut upgrade) = self.devices.get_mut(&ieee) {
            upgrade.state = UpgradeState::Applied;
        }
        tracing::info!(
            "OTA upgrade on {} applied: version {:#010x}",
            ieee,
            request.file_version
        );
        Some(OtaReply {
            command_id: command::UPGRADE_END_RESPONSE,
            payload: response.serialize(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use zigbee_wire::ota_image::{tag, OtaHeader, SubElement};

    fn make_image(file_version: u32, body: usize) -> OtaImage {
        OtaImage {
            header: OtaHeader {
                header_version: 0x0100,
                field_control: 0,
                manufacturer_code: 4476,
                image_type: 0x2101,
                file_version,
                stack_version: 2,
                header_string: [0; 32],
                image_size: 0,
                security_credential_version: None,
                upgrade_file_destination: None,
                minimum_hardware_version: None,
                maximum_hardware_version: None,
            },
            subelements: vec![SubElement {
                tag_id: tag::UPGRADE_IMAGE,
                data: vec![0x5A; body],
            }],
        }
    }

    struct StaticProvider {
        name: &'static str,
        priority: ProviderPriority,
        image: Option<OtaImage>,
    }

    #[async_trait]
    impl OtaProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> ProviderPriority {
            self.priority
        }

        async fn refresh(&self) -> Result<(), OtaError> {
            Ok(())
        }

        async fn get_image(
            &self,
            key: ImageKey,
            _hardware_version: Option<u16>,
        ) -> Result<Option<OtaImage>, OtaError> {
            Ok(self
                .image
                .clone()
                .filter(|image| image.key() == key))
        }
    }

    fn engine_with(images: Vec<(&'static str, ProviderPriority, OtaImage)>) -> OtaEngine {
        OtaEngine::new(
            images
                .into_iter()
                .map(|(name, priority, image)| {
                    Arc::new(StaticProvider {
                        name,
                        priority,
                        image: Some(image),
                    }) as Arc<dyn OtaProvider>
                })
                .collect(),
        )
    }

    fn device() -> Eui64 {
        Eui64::parse("ec:1b:bd:ff:fe:54:4f:40").unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_block_transfer() {
        let image = make_image(0x0100_0020, 150);
        let total = image.total_size();
        let engine = engine_with(vec![("test", ProviderPriority::FirstParty, image)]);
        let ieee = device();

        // Query-Next-Image
        let query = QueryNextImage {
            field_control: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            current_file_version: 0x0100_0001,
            hardware_version: None,
        };
        let reply = engine
            .handle_command(ieee, command::QUERY_NEXT_IMAGE, &query.serialize())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.command_id, command::QUERY_NEXT_IMAGE_RESPONSE);
        let response = QueryNextImageResponse::parse(&reply.payload).unwrap();
        let (key, version, size) = response.image.unwrap();
        assert_eq!(version, 0x0100_0020);
        assert_eq!(size, total);
        assert_eq!(engine.state(ieee), UpgradeState::Downloading);

        // Image blocks at strictly increasing offsets covering [0, total)
        let mut offset = 0u32;
        let mut received = Vec::new();
        while offset < total {
            let request = ImageBlockRequest {
                field_control: 0,
                manufacturer_code: key.manufacturer_code,
                image_type: key.image_type,
                file_version: version,
                file_offset: offset,
                maximum_data_size: 48,
            };
            let reply = engine
                .handle_command(ieee, command::IMAGE_BLOCK_REQUEST, &request.serialize())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply.command_id, command::IMAGE_BLOCK_RESPONSE);
            let block = ImageBlockResponse::parse(&reply.payload).unwrap();
            assert_eq!(block.status, 0x00);
            assert_eq!(block.file_offset, offset);
            assert!(block.data.len() <= 48);
            assert!(!block.data.is_empty());
            received.extend_from_slice(&block.data);
            offset += block.data.len() as u32;
        }
        assert_eq!(received.len() as u32, total);

        assert_eq!(engine.progress(ieee), Some((total, total)));

        // Upgrade-End
        let end = UpgradeEndRequest {
            status: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            file_version: version,
        };
        let reply = engine
            .handle_command(ieee, command::UPGRADE_END_REQUEST, &end.serialize())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.command_id, command::UPGRADE_END_RESPONSE);
        let response = UpgradeEndResponse::parse(&reply.payload).unwrap();
        assert_eq!(response.current_time, 0);
        assert_eq!(response.upgrade_time, 0);
        assert_eq!(engine.state(ieee), UpgradeState::Applied);
    }

    #[tokio::test]
    async fn test_no_image_available() {
        let engine = engine_with(vec![]);
        let query = QueryNextImage {
            field_control: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            current_file_version: 5,
            hardware_version: None,
        };
        let reply = engine
            .handle_command(device(), command::QUERY_NEXT_IMAGE, &query.serialize())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload, vec![0x98]);
        assert_eq!(engine.state(device()), UpgradeState::Idle);
    }

    #[tokio::test]
    async fn test_same_version_not_offered() {
        let engine = engine_with(vec![(
            "test",
            ProviderPriority::FirstParty,
            make_image(0x0100_0020, 10),
        )]);
        let query = QueryNextImage {
            field_control: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            current_file_version: 0x0100_0020,
            hardware_version: None,
        };
        let reply = engine
            .handle_command(device(), command::QUERY_NEXT_IMAGE, &query.serialize())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload, vec![0x98]);
    }

    #[tokio::test]
    async fn test_highest_version_wins_then_priority() {
        // A newer version beats a higher-priority provider
        let engine = engine_with(vec![
            ("local", ProviderPriority::LocalDirectory, make_image(0x10, 10)),
            ("aggregate", ProviderPriority::Aggregate, make_image(0x20, 10)),
        ]);
        let selected = engine
            .select_image(
                ImageKey {
                    manufacturer_code: 4476,
                    image_type: 0x2101,
                },
                0,
                None,
            )
            .await
            .unwrap();
        assert_eq!(selected.header.file_version, 0x20);

        // Equal versions: the local directory outranks the aggregate
        let engine = engine_with(vec![
            ("aggregate", ProviderPriority::Aggregate, make_image(0x20, 10)),
            ("local", ProviderPriority::LocalDirectory, make_image(0x20, 20)),
        ]);
        let selected = engine
            .select_image(
                ImageKey {
                    manufacturer_code: 4476,
                    image_type: 0x2101,
                },
                0,
                None,
            )
            .await
            .unwrap();
        assert_eq!(selected.subelements[0].data.len(), 20);
    }

    #[tokio::test]
    async fn test_failed_upgrade_end_keeps_image_for_retry() {
        let engine = engine_with(vec![(
            "test",
            ProviderPriority::FirstParty,
            make_image(0x0100_0020, 32),
        )]);
        let ieee = device();
        let query = QueryNextImage {
            field_control: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            current_file_version: 1,
            hardware_version: None,
        };
        engine
            .handle_command(ieee, command::QUERY_NEXT_IMAGE, &query.serialize())
            .await
            .unwrap();

        let end = UpgradeEndRequest {
            status: 0x95, // ABORT
            manufacturer_code: 4476,
            image_type: 0x2101,
            file_version: 0x0100_0020,
        };
        let reply = engine
            .handle_command(ieee, command::UPGRADE_END_REQUEST, &end.serialize())
            .await
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(engine.state(ieee), UpgradeState::Failed);

        // The next query starts over and still finds the image
        let reply = engine
            .handle_command(ieee, command::QUERY_NEXT_IMAGE, &query.serialize())
            .await
            .unwrap()
            .unwrap();
        let response = QueryNextImageResponse::parse(&reply.payload).unwrap();
        assert!(response.image.is_some());
        assert_eq!(engine.state(ieee), UpgradeState::Downloading);
    }

    #[tokio::test]
    async fn test_block_request_for_unknown_image() {
        let engine = engine_with(vec![]);
        let request = ImageBlockRequest {
            field_control: 0,
            manufacturer_code: 1,
            image_type: 1,
            file_version: 1,
            file_offset: 0,
            maximum_data_size: 64,
        };
        let reply = engine
            .handle_command(device(), command::IMAGE_BLOCK_REQUEST, &request.serialize())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload, vec![0x98]);
    }
}
