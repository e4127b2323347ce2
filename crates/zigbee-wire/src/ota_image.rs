//! Zigbee OTA upgrade file format
//!
//! A standard OTA file is a fixed header (identified by the magic
//! 0x0BEEF11E) followed by tagged sub-elements. The header's field-control
//! bitmask gates three optional trailing header fields.

use serde::{Deserialize, Serialize};

use crate::types::{read_u16, read_u32, take, CodecError, Eui64};

/// OTA upgrade file identifier
pub const OTA_MAGIC: u32 = 0x0BEE_F11E;

/// Sub-element tags
pub mod tag {
    pub const UPGRADE_IMAGE: u16 = 0x0000;
    pub const ECDSA_SIGNATURE: u16 = 0x0001;
    pub const ECDSA_CERTIFICATE: u16 = 0x0002;
    pub const IMAGE_INTEGRITY_CODE: u16 = 0x0003;
}

/// Identifies a firmware image family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey {
    pub manufacturer_code: u16,
    pub image_type: u16,
}

/// OTA file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaHeader {
    pub header_version: u16,
    pub field_control: u16,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub stack_version: u16,
    pub header_string: [u8; 32],
    pub image_size: u32,
    pub security_credential_version: Option<u8>,
    pub upgrade_file_destination: Option<Eui64>,
    pub minimum_hardware_version: Option<u16>,
    pub maximum_hardware_version: Option<u16>,
}

impl OtaHeader {
    pub fn key(&self) -> ImageKey {
        ImageKey {
            manufacturer_code: self.manufacturer_code,
            image_type: self.image_type,
        }
    }
}

/// One tagged sub-element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubElement {
    pub tag_id: u16,
    pub data: Vec<u8>,
}

/// A parsed OTA upgrade file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaImage {
    pub header: OtaHeader,
    pub subelements: Vec<SubElement>,
}

impl OtaImage {
    /// Parse a complete OTA file
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let (magic, rest) = read_u32(data)?;
        if magic != OTA_MAGIC {
            return Err(CodecError::InvalidFrame(format!(
                "Bad OTA file identifier: {magic:#010x}"
            )));
        }
        let (header_version, rest) = read_u16(rest)?;
        let (header_length, rest) = read_u16(rest)?;
        let (field_control, rest) = read_u16(rest)?;
        let (manufacturer_code, rest) = read_u16(rest)?;
        let (image_type, rest) = read_u16(rest)?;
        let (file_version, rest) = read_u32(rest)?;
        let (stack_version, rest) = read_u16(rest)?;
        let (string_bytes, rest) = take(rest, 32)?;
        let mut header_string = [0u8; 32];
        header_string.copy_from_slice(string_bytes);
        let (image_size, mut rest) = read_u32(rest)?;

        let security_credential_version = if field_control & 0x01 != 0 {
            let (v, r) = crate::types::read_u8(rest)?;
            rest = r;
            Some(v)
        } else {
            None
        };
        let upgrade_file_destination = if field_control & 0x02 != 0 {
            let (v, r) = Eui64::decode(rest)?;
            rest = r;
            Some(v)
        } else {
            None
        };
        let (minimum_hardware_version, maximum_hardware_version) = if field_control & 0x04 != 0 {
            let (min, r) = read_u16(rest)?;
            let (max, r) = read_u16(r)?;
            rest = r;
            (Some(min), Some(max))
        } else {
            (None, None)
        };

        // header_length covers everything up to here; tolerate padding
        let consumed = data.len() - rest.len();
        if usize::from(header_length) > consumed {
            let (_, r) = take(rest, usize::from(header_length) - consumed)?;
            rest = r;
        }

        let mut subelements = Vec::new();
        while !rest.is_empty() {
            let (tag_id, r) = read_u16(rest)?;
            let (length, r) = read_u32(r)?;
            let (body, r) = take(r, length as usize)?;
            subelements.push(SubElement {
                tag_id,
                data: body.to_vec(),
            });
            rest = r;
        }

        Ok(Self {
            header: OtaHeader {
                header_version,
                field_control,
                manufacturer_code,
                image_type,
                file_version,
                stack_version,
                header_string,
                image_size,
                security_credential_version,
                upgrade_file_destination,
                minimum_hardware_version,
                maximum_hardware_version,
            },
            subelements,
        })
    }

    /// Serialize back into a complete OTA file
    pub fn serialize(&self) -> Vec<u8> {
        let h = &self.header;
        let mut header_length = 56u16;
        if h.security_credential_version.is_some() {
            header_length += 1;
        }
        if h.upgrade_file_destination.is_some() {
            header_length += 8;
        }
        if h.minimum_hardware_version.is_some() {
            header_length += 4;
        }

        let mut out = Vec::new();
        out.extend_from_slice(&OTA_MAGIC.to_le_bytes());
        out.extend_from_slice(&h.header_version.to_le_bytes());
        out.extend_from_slice(&header_length.to_le_bytes());
        out.extend_from_slice(&h.field_control.to_le_bytes());
        out.extend_from_slice(&h.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&h.image_type.to_le_bytes());
        out.extend_from_slice(&h.file_version.to_le_bytes());
        out.extend_from_slice(&h.stack_version.to_le_bytes());
        out.extend_from_slice(&h.header_string);
        out.extend_from_slice(&h.image_size.to_le_bytes());
        if let Some(v) = h.security_credential_version {
            out.push(v);
        }
        if let Some(v) = h.upgrade_file_destination {
            v.encode(&mut out);
        }
        if let (Some(min), Some(max)) = (h.minimum_hardware_version, h.maximum_hardware_version) {
            out.extend_from_slice(&min.to_le_bytes());
            out.extend_from_slice(&max.to_le_bytes());
        }
        for element in &self.subelements {
            out.extend_from_slice(&element.tag_id.to_le_bytes());
            out.extend_from_slice(&(element.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&element.data);
        }
        out
    }

    pub fn key(&self) -> ImageKey {
        self.header.key()
    }

    /// Whether this image upgrades a device at `current_version` with the
    /// given hardware version
    pub fn should_update(&self, current_version: u32, hardware_version: Option<u16>) -> bool {
        if self.header.file_version <= current_version {
            return false;
        }
        if let (Some(hw), Some(min)) = (hardware_version, self.header.minimum_hardware_version) {
            if hw < min {
                return false;
            }
        }
        if let (Some(hw), Some(max)) = (hardware_version, self.header.maximum_hardware_version) {
            if hw > max {
                return false;
            }
        }
        true
    }

    /// The full serialized file as transferred to devices
    pub fn data(&self) -> Vec<u8> {
        self.serialize()
    }

    /// Total transfer size in bytes
    pub fn total_size(&self) -> u32 {
        self.serialize().len() as u32
    }

    /// A block of the serialized file, at most `size` bytes from `offset`
    pub fn get_block(&self, offset: u32, size: u8) -> Result<Vec<u8>, CodecError> {
        let data = self.serialize();
        let offset = offset as usize;
        if offset >= data.len() {
            return Err(CodecError::ValueOutOfRange(0));
        }
        let end = usize::min(offset + usize::from(size), data.len());
        Ok(data[offset..end].to_vec())
    }
}

/// OTA cluster (0x0019) command ids
pub mod command {
    /// Server → client
    pub const IMAGE_NOTIFY: u8 = 0x00;
    /// Client → server
    pub const QUERY_NEXT_IMAGE: u8 = 0x01;
    pub const QUERY_NEXT_IMAGE_RESPONSE: u8 = 0x02;
    pub const IMAGE_BLOCK_REQUEST: u8 = 0x03;
    pub const IMAGE_PAGE_REQUEST: u8 = 0x04;
    pub const IMAGE_BLOCK_RESPONSE: u8 = 0x05;
    pub const UPGRADE_END_REQUEST: u8 = 0x06;
    pub const UPGRADE_END_RESPONSE: u8 = 0x07;
}

/// Query-Next-Image request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryNextImage {
    pub field_control: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub current_file_version: u32,
    pub hardware_version: Option<u16>,
}

impl QueryNextImage {
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let (field_control, rest) = crate::types::read_u8(buf)?;
        let (manufacturer_code, rest) = read_u16(rest)?;
        let (image_type, rest) = read_u16(rest)?;
        let (current_file_version, rest) = read_u32(rest)?;
        let hardware_version = if field_control & 0x01 != 0 {
            Some(read_u16(rest)?.0)
        } else {
            None
        };
        Ok(Self {
            field_control,
            manufacturer_code,
            image_type,
            current_file_version,
            hardware_version,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.field_control];
        out.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&self.image_type.to_le_bytes());
        out.extend_from_slice(&self.current_file_version.to_le_bytes());
        if let Some(hw) = self.hardware_version {
            out.extend_from_slice(&hw.to_le_bytes());
        }
        out
    }

    pub fn key(&self) -> ImageKey {
        ImageKey {
            manufacturer_code: self.manufacturer_code,
            image_type: self.image_type,
        }
    }
}

/// Query-Next-Image response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryNextImageResponse {
    pub status: u8,
    /// Present iff status is SUCCESS
    pub image: Option<(ImageKey, u32, u32)>,
}

impl QueryNextImageResponse {
    pub fn available(key: ImageKey, file_version: u32, image_size: u32) -> Self {
        Self {
            status: 0x00,
            image: Some((key, file_version, image_size)),
        }
    }

    pub fn no_image() -> Self {
        // NO_IMAGE_AVAILABLE
        Self {
            status: 0x98,
            image: None,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        if let Some((key, file_version, image_size)) = self.image {
            out.extend_from_slice(&key.manufacturer_code.to_le_bytes());
            out.extend_from_slice(&key.image_type.to_le_bytes());
            out.extend_from_slice(&file_version.to_le_bytes());
            out.extend_from_slice(&image_size.to_le_bytes());
        }
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let (status, rest) = crate::types::read_u8(buf)?;
        if status != 0x00 {
            return Ok(Self {
                status,
                image: None,
            });
        }
        let (manufacturer_code, rest) = read_u16(rest)?;
        let (image_type, rest) = read_u16(rest)?;
        let (file_version, rest) = read_u32(rest)?;
        let (image_size, _) = read_u32(rest)?;
        Ok(Self {
            status,
            image: Some((
                ImageKey {
                    manufacturer_code,
                    image_type,
                },
                file_version,
                image_size,
            )),
        })
    }
}

/// Image-Block request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBlockRequest {
    pub field_control: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub file_offset: u32,
    pub maximum_data_size: u8,
}

impl ImageBlockRequest {
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let (field_control, rest) = crate::types::read_u8(buf)?;
        let (manufacturer_code, rest) = read_u16(rest)?;
        let (image_type, rest) = read_u16(rest)?;
        let (file_version, rest) = read_u32(rest)?;
        let (file_offset, rest) = read_u32(rest)?;
        let (maximum_data_size, _) = crate::types::read_u8(rest)?;
        Ok(Self {
            field_control,
            manufacturer_code,
            image_type,
            file_version,
            file_offset,
            maximum_data_size,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.field_control];
        out.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&self.image_type.to_le_bytes());
        out.extend_from_slice(&self.file_version.to_le_bytes());
        out.extend_from_slice(&self.file_offset.to_le_bytes());
        out.push(self.maximum_data_size);
        out
    }

    pub fn key(&self) -> ImageKey {
        ImageKey {
            manufacturer_code: self.manufacturer_code,
            image_type: self.image_type,
        }
    }
}

/// Image-Block response payload (SUCCESS form carries data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlockResponse {
    pub status: u8,
    pub key: ImageKey,
    pub file_version: u32,
    pub file_offset: u32,
    pub data: Vec<u8>,
}

impl ImageBlockResponse {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        if self.status != 0x00 {
            return out;
        }
        out.extend_from_slice(&self.key.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&self.key.image_type.to_le_bytes());
        out.extend_from_slice(&self.file_version.to_le_bytes());
        out.extend_from_slice(&self.file_offset.to_le_bytes());
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let (status, rest) = crate::types::read_u8(buf)?;
        if status != 0x00 {
            return Ok(Self {
                status,
                key: ImageKey {
                    manufacturer_code: 0,
                    image_type: 0,
                },
                file_version: 0,
                file_offset: 0,
                data: Vec::new(),
            });
        }
        let (manufacturer_code, rest) = read_u16(rest)?;
        let (image_type, rest) = read_u16(rest)?;
        let (file_version, rest) = read_u32(rest)?;
        let (file_offset, rest) = read_u32(rest)?;
        let (len, rest) = crate::types::read_u8(rest)?;
        let (data, _) = take(rest, len as usize)?;
        Ok(Self {
            status,
            key: ImageKey {
                manufacturer_code,
                image_type,
            },
            file_version,
            file_offset,
            data: data.to_vec(),
        })
    }
}

/// Upgrade-End request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeEndRequest {
    pub status: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
}

impl UpgradeEndRequest {
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let (status, rest) = crate::types::read_u8(buf)?;
        let (manufacturer_code, rest) = read_u16(rest)?;
        let (image_type, rest) = read_u16(rest)?;
        let (file_version, _) = read_u32(rest)?;
        Ok(Self {
            status,
            manufacturer_code,
            image_type,
            file_version,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        out.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&self.image_type.to_le_bytes());
        out.extend_from_slice(&self.file_version.to_le_bytes());
        out
    }
}

/// Upgrade-End response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeEndResponse {
    pub key: ImageKey,
    pub file_version: u32,
    pub current_time: u32,
    pub upgrade_time: u32,
}

impl UpgradeEndResponse {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.key.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&self.key.image_type.to_le_bytes());
        out.extend_from_slice(&self.file_version.to_le_bytes());
        out.extend_from_slice(&self.current_time.to_le_bytes());
        out.extend_from_slice(&self.upgrade_time.to_le_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let (manufacturer_code, rest) = read_u16(buf)?;
        let (image_type, rest) = read_u16(rest)?;
        let (file_version, rest) = read_u32(rest)?;
        let (current_time, rest) = read_u32(rest)?;
        let (upgrade_time, _) = read_u32(rest)?;
        Ok(Self {
            key: ImageKey {
                manufacturer_code,
                image_type,
            },
            file_version,
            current_time,
            upgrade_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> OtaImage {
        let mut header_string = [0u8; 32];
        header_string[..8].copy_from_slice(b"GL-Tests");
        OtaImage {
            header: OtaHeader {
                header_version: 0x0100,
                field_control: 0x0004,
                manufacturer_code: 4476,
                image_type: 0x2101,
                file_version: 0x0100_0020,
                stack_version: 2,
                header_string,
                image_size: 0,
                security_credential_version: None,
                upgrade_file_destination: None,
                minimum_hardware_version: Some(1),
                maximum_hardware_version: Some(3),
            },
            subelements: vec![SubElement {
                tag_id: tag::UPGRADE_IMAGE,
                data: vec![0xAA; 100],
            }],
        }
    }

    #[test]
    fn test_roundtrip() {
        let image = test_image();
        let parsed = OtaImage::parse(&image.serialize()).unwrap();
        assert_eq!(parsed, image);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = test_image().serialize();
        data[0] = 0x00;
        assert!(OtaImage::parse(&data).is_err());
    }

    #[test]
    fn test_should_update() {
        let image = test_image();
        assert!(image.should_update(0x0100_0001, Some(2)));
        assert!(!image.should_update(0x0100_0020, Some(2))); // same version
        assert!(!image.should_update(0x0100_0021, Some(2))); // downgrade
        assert!(!image.should_update(0x0100_0001, Some(0))); // hw too old
        assert!(!image.should_update(0x0100_0001, Some(9))); // hw too new
        assert!(image.should_update(0x0100_0001, None));
    }

    #[test]
    fn test_get_block_clamps_to_size() {
        let image = test_image();
        let total = image.total_size();
        let block = image.get_block(0, 64).unwrap();
        assert_eq!(block.len(), 64);
        let tail = image.get_block(total - 10, 64).unwrap();
        assert_eq!(tail.len(), 10);
        assert!(image.get_block(total, 64).is_err());
    }

    #[test]
    fn test_command_payload_roundtrips() {
        let query = QueryNextImage {
            field_control: 0x01,
            manufacturer_code: 4476,
            image_type: 0x2101,
            current_file_version: 0x0100_0001,
            hardware_version: Some(2),
        };
        assert_eq!(QueryNextImage::parse(&query.serialize()).unwrap(), query);

        let response = QueryNextImageResponse::available(query.key(), 0x0100_0020, 1234);
        assert_eq!(
            QueryNextImageResponse::parse(&response.serialize()).unwrap(),
            response
        );
        let none = QueryNextImageResponse::no_image();
        assert_eq!(none.serialize(), vec![0x98]);

        let block_req = ImageBlockRequest {
            field_control: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            file_version: 0x0100_0020,
            file_offset: 128,
            maximum_data_size: 64,
        };
        assert_eq!(
            ImageBlockRequest::parse(&block_req.serialize()).unwrap(),
            block_req
        );

        let block_rsp = ImageBlockResponse {
            status: 0x00,
            key: query.key(),
            file_version: 0x0100_0020,
            file_offset: 128,
            data: vec![0xAB; 64],
        };
        assert_eq!(
            ImageBlockResponse::parse(&block_rsp.serialize()).unwrap(),
            block_rsp
        );

        let end_req = UpgradeEndRequest {
            status: 0,
            manufacturer_code: 4476,
            image_type: 0x2101,
            file_version: 0x0100_0020,
        };
        assert_eq!(
            UpgradeEndRequest::parse(&end_req.serialize()).unwrap(),
            end_req
        );

        let end_rsp = UpgradeEndResponse {
            key: query.key(),
            file_version: 0x0100_0020,
            current_time: 0,
            upgrade_time: 0,
        };
        assert_eq!(
            UpgradeEndResponse::parse(&end_rsp.serialize()).unwrap(),
            end_rsp
        );
    }

    #[test]
    fn test_optional_header_fields() {
        let mut image = test_image();
        image.header.field_control = 0x0003;
        image.header.minimum_hardware_version = None;
        image.header.maximum_hardware_version = None;
        image.header.security_credential_version = Some(2);
        image.header.upgrade_file_destination = Some(Eui64::from(0xEC1B_BDFF_FE54_4F40));
        let parsed = OtaImage::parse(&image.serialize()).unwrap();
        assert_eq!(parsed, image);
    }
}
