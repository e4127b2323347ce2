//! ZCL frame header and the general (profile-wide) command set
//!
//! A ZCL frame is one frame-control byte, an optional 2-byte manufacturer
//! code, a transaction sequence number, a command id and the command payload.
//! General commands operate on attributes and are shared by every cluster;
//! cluster-specific commands are resolved against the cluster registry.

use crate::types::{read_u16, read_u8, CodecError, TypeId, ZclValue};

/// Frame type bits (frame control bits 0-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Global = 0x00,
    ClusterSpecific = 0x01,
}

/// Frame direction (frame control bit 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    ClientToServer = 0x00,
    ServerToClient = 0x01,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Self::ClientToServer => Self::ServerToClient,
            Self::ServerToClient => Self::ClientToServer,
        }
    }
}

/// Decoded ZCL frame-control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub frame_type: FrameType,
    pub manufacturer_specific: bool,
    pub direction: Direction,
    pub disable_default_response: bool,
}

impl FrameControl {
    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        let frame_type = match byte & 0x03 {
            0x00 => FrameType::Global,
            0x01 => FrameType::ClusterSpecific,
            other => {
                return Err(CodecError::InvalidFrame(format!(
                    "Reserved frame type: {other:#04x}"
                )))
            }
        };
        Ok(Self {
            frame_type,
            manufacturer_specific: (byte & 0x04) != 0,
            direction: if (byte & 0x08) != 0 {
                Direction::ServerToClient
            } else {
                Direction::ClientToServer
            },
            disable_default_response: (byte & 0x10) != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.frame_type as u8;
        if self.manufacturer_specific {
            byte |= 0x04;
        }
        if self.direction == Direction::ServerToClient {
            byte |= 0x08;
        }
        if self.disable_default_response {
            byte |= 0x10;
        }
        byte
    }
}

/// ZCL frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclHeader {
    pub control: FrameControl,
    pub manufacturer_code: Option<u16>,
    pub tsn: u8,
    pub command_id: u8,
}

/// A complete ZCL frame: header plus raw command payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame {
    pub header: ZclHeader,
    pub payload: Vec<u8>,
}

impl ZclFrame {
    /// Parse a ZCL frame from raw ASDU bytes
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let (control_byte, rest) = read_u8(data)?;
        let control = FrameControl::from_byte(control_byte)?;

        let (manufacturer_code, rest) = if control.manufacturer_specific {
            let (code, rest) = read_u16(rest)?;
            (Some(code), rest)
        } else {
            (None, rest)
        };

        let (tsn, rest) = read_u8(rest)?;
        let (command_id, rest) = read_u8(rest)?;

        Ok(Self {
            header: ZclHeader {
                control,
                manufacturer_code,
                tsn,
                command_id,
            },
            payload: rest.to_vec(),
        })
    }

    /// Serialize to ASDU bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(5 + self.payload.len());
        data.push(self.header.control.to_byte());
        if let Some(code) = self.header.manufacturer_code {
            data.extend_from_slice(&code.to_le_bytes());
        }
        data.push(self.header.tsn);
        data.push(self.header.command_id);
        data.extend_from_slice(&self.payload);
        data
    }

    /// Build a general (profile-wide) frame from a typed command
    pub fn general(
        tsn: u8,
        command: &GeneralCommand,
        direction: Direction,
        manufacturer_code: Option<u16>,
    ) -> Self {
        Self {
            header: ZclHeader {
                control: FrameControl {
                    frame_type: FrameType::Global,
                    manufacturer_specific: manufacturer_code.is_some(),
                    direction,
                    disable_default_response: false,
                },
                manufacturer_code,
                tsn,
                command_id: command.id() as u8,
            },
            payload: command.encode(),
        }
    }

    /// Build a cluster-specific request frame
    pub fn cluster_request(
        tsn: u8,
        command_id: u8,
        payload: Vec<u8>,
        manufacturer_code: Option<u16>,
    ) -> Self {
        Self {
            header: ZclHeader {
                control: FrameControl {
                    frame_type: FrameType::ClusterSpecific,
                    manufacturer_specific: manufacturer_code.is_some(),
                    direction: Direction::ClientToServer,
                    disable_default_response: false,
                },
                manufacturer_code,
                tsn,
                command_id,
            },
            payload,
        }
    }

    /// Build a cluster-specific response frame echoing this frame's TSN
    pub fn cluster_response(&self, command_id: u8, payload: Vec<u8>) -> Self {
        Self {
            header: ZclHeader {
                control: FrameControl {
                    frame_type: FrameType::ClusterSpecific,
                    manufacturer_specific: self.header.manufacturer_code.is_some(),
                    direction: self.header.control.direction.flipped(),
                    disable_default_response: true,
                },
                manufacturer_code: self.header.manufacturer_code,
                tsn: self.header.tsn,
                command_id,
            },
            payload,
        }
    }

    /// Whether a default response must be generated for this frame,
    /// assuming the handler produced no command-specific response
    pub fn wants_default_response(&self) -> bool {
        if self.header.control.disable_default_response {
            return false;
        }
        // Never answer a default response with another one
        !(self.header.control.frame_type == FrameType::Global
            && self.header.command_id == GeneralCommandId::DefaultResponse as u8)
    }

    /// Build the Default-Response frame for this frame, echoing its TSN
    pub fn default_response(&self, status: ZclStatus) -> Self {
        let command = GeneralCommand::DefaultResponse(DefaultResponse {
            command_id: self.header.command_id,
            status,
        });
        Self {
            header: ZclHeader {
                control: FrameControl {
                    frame_type: FrameType::Global,
                    manufacturer_specific: self.header.manufacturer_code.is_some(),
                    direction: self.header.control.direction.flipped(),
                    disable_default_response: true,
                },
                manufacturer_code: self.header.manufacturer_code,
                tsn: self.header.tsn,
                command_id: GeneralCommandId::DefaultResponse as u8,
            },
            payload: command.encode(),
        }
    }

    /// Decode the payload as a general command (for global frames)
    pub fn general_command(&self) -> Result<GeneralCommand, CodecError> {
        let id = GeneralCommandId::from_u8(self.header.command_id).ok_or_else(|| {
            CodecError::InvalidFrame(format!(
                "Unknown general command: {:#04x}",
                self.header.command_id
            ))
        })?;
        GeneralCommand::decode(id, &self.payload)
    }
}

/// ZCL status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZclStatus {
    Success,
    Failure,
    MalformedCommand,
    UnsupClusterCommand,
    UnsupGeneralCommand,
    InvalidField,
    UnsupportedAttribute,
    InvalidValue,
    ReadOnly,
    InsufficientSpace,
    NotFound,
    UnreportableAttribute,
    InvalidDataType,
    Timeout,
    Abort,
    InvalidImage,
    WaitForData,
    NoImageAvailable,
    RequireMoreImage,
    UnsupportedCluster,
    Other(u8),
}

impl ZclStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => Self::Success,
            0x01 => Self::Failure,
            0x80 => Self::MalformedCommand,
            0x81 => Self::UnsupClusterCommand,
            0x82 => Self::UnsupGeneralCommand,
            0x85 => Self::InvalidField,
            0x86 => Self::UnsupportedAttribute,
            0x87 => Self::InvalidValue,
            0x88 => Self::ReadOnly,
            0x89 => Self::InsufficientSpace,
            0x8B => Self::NotFound,
            0x8C => Self::UnreportableAttribute,
            0x8D => Self::InvalidDataType,
            0x94 => Self::Timeout,
            0x95 => Self::Abort,
            0x96 => Self::InvalidImage,
            0x97 => Self::WaitForData,
            0x98 => Self::NoImageAvailable,
            0x99 => Self::RequireMoreImage,
            0xC3 => Self::UnsupportedCluster,
            other => Self::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::Failure => 0x01,
            Self::MalformedCommand => 0x80,
            Self::UnsupClusterCommand => 0x81,
            Self::UnsupGeneralCommand => 0x82,
            Self::InvalidField => 0x85,
            Self::UnsupportedAttribute => 0x86,
            Self::InvalidValue => 0x87,
            Self::ReadOnly => 0x88,
            Self::InsufficientSpace => 0x89,
            Self::NotFound => 0x8B,
            Self::UnreportableAttribute => 0x8C,
            Self::InvalidDataType => 0x8D,
            Self::Timeout => 0x94,
            Self::Abort => 0x95,
            Self::InvalidImage => 0x96,
            Self::WaitForData => 0x97,
            Self::NoImageAvailable => 0x98,
            Self::RequireMoreImage => 0x99,
            Self::UnsupportedCluster => 0xC3,
            Self::Other(v) => v,
        }
    }
}

/// General command ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GeneralCommandId {
    ReadAttributes = 0x00,
    ReadAttributesResponse = 0x01,
    WriteAttributes = 0x02,
    WriteAttributesUndivided = 0x03,
    WriteAttributesResponse = 0x04,
    WriteAttributesNoResponse = 0x05,
    ConfigureReporting = 0x06,
    ConfigureReportingResponse = 0x07,
    ReadReportingConfig = 0x08,
    ReadReportingConfigResponse = 0x09,
    ReportAttributes = 0x0A,
    DefaultResponse = 0x0B,
    DiscoverAttributes = 0x0C,
    DiscoverAttributesResponse = 0x0D,
    DiscoverCommandsReceived = 0x11,
    DiscoverCommandsReceivedResponse = 0x12,
    DiscoverCommandsGenerated = 0x13,
    DiscoverCommandsGeneratedResponse = 0x14,
    DiscoverAttributesExtended = 0x15,
    DiscoverAttributesExtendedResponse = 0x16,
}

impl GeneralCommandId {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::ReadAttributes,
            0x01 => Self::ReadAttributesResponse,
            0x02 => Self::WriteAttributes,
            0x03 => Self::WriteAttributesUndivided,
            0x04 => Self::WriteAttributesResponse,
            0x05 => Self::WriteAttributesNoResponse,
            0x06 => Self::ConfigureReporting,
            0x07 => Self::ConfigureReportingResponse,
            0x08 => Self::ReadReportingConfig,
            0x09 => Self::ReadReportingConfigResponse,
            0x0A => Self::ReportAttributes,
            0x0B => Self::DefaultResponse,
            0x0C => Self::DiscoverAttributes,
            0x0D => Self::DiscoverAttributesResponse,
            0x11 => Self::DiscoverCommandsReceived,
            0x12 => Self::DiscoverCommandsReceivedResponse,
            0x13 => Self::DiscoverCommandsGenerated,
            0x14 => Self::DiscoverCommandsGeneratedResponse,
            0x15 => Self::DiscoverAttributesExtended,
            0x16 => Self::DiscoverAttributesExtendedResponse,
            _ => return None,
        })
    }
}

/// One attribute in a Report-Attributes command
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeReport {
    pub attr_id: u16,
    pub value: ZclValue,
}

/// One record in a Read-Attributes-Response
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAttributeRecord {
    pub attr_id: u16,
    pub status: ZclStatus,
    /// Present iff status is Success
    pub value: Option<ZclValue>,
}

/// One record in a Write-Attributes request
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAttributeRecord {
    pub attr_id: u16,
    pub value: ZclValue,
}

/// One record in a Write-Attributes-Response
///
/// An all-success response is a single record with no attribute id.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAttributeStatus {
    pub status: ZclStatus,
    pub attr_id: Option<u16>,
}

/// One record in a Configure-Reporting request
#[derive(Debug, Clone, PartialEq)]
pub enum ReportingConfig {
    /// direction 0x00: the sender reports this attribute
    Reported {
        attr_id: u16,
        type_id: TypeId,
        min_interval: u16,
        max_interval: u16,
        /// Only present for analog types
        reportable_change: Option<ZclValue>,
    },
    /// direction 0x01: the sender expects reports of this attribute
    Received { attr_id: u16, timeout: u16 },
}

impl ReportingConfig {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Reported {
                attr_id,
                type_id,
                min_interval,
                max_interval,
                reportable_change,
            } => {
                out.push(0x00);
                out.extend_from_slice(&attr_id.to_le_bytes());
                out.push(*type_id as u8);
                out.extend_from_slice(&min_interval.to_le_bytes());
                out.extend_from_slice(&max_interval.to_le_bytes());
                if let Some(change) = reportable_change {
                    change.encode(out);
                }
            }
            Self::Received { attr_id, timeout } => {
                out.push(0x01);
                out.extend_from_slice(&attr_id.to_le_bytes());
                out.extend_from_slice(&timeout.to_le_bytes());
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (direction, rest) = read_u8(buf)?;
        let (attr_id, rest) = read_u16(rest)?;
        match direction {
            0x00 => {
                let (type_code, rest) = read_u8(rest)?;
                let type_id =
                    TypeId::from_u8(type_code).ok_or(CodecError::UnknownTypeCode(type_code))?;
                let (min_interval, rest) = read_u16(rest)?;
                let (max_interval, rest) = read_u16(rest)?;
                let (reportable_change, rest) = if type_id.is_analog() {
                    let (v, rest) = ZclValue::decode(type_id, rest)?;
                    (Some(v), rest)
                } else {
                    (None, rest)
                };
                Ok((
                    Self::Reported {
                        attr_id,
                        type_id,
                        min_interval,
                        max_interval,
                        reportable_change,
                    },
                    rest,
                ))
            }
            0x01 => {
                let (timeout, rest) = read_u16(rest)?;
                Ok((Self::Received { attr_id, timeout }, rest))
            }
            other => Err(CodecError::InvalidFrame(format!(
                "Invalid reporting direction: {other:#04x}"
            ))),
        }
    }

    /// The (direction, attribute) selector this configuration answers
    pub fn selector(&self) -> ReportingSelector {
        match self {
            Self::Reported { attr_id, .. } => ReportingSelector {
                direction: 0x00,
                attr_id: *attr_id,
            },
            Self::Received { attr_id, .. } => ReportingSelector {
                direction: 0x01,
                attr_id: *attr_id,
            },
        }
    }
}

/// One record in a Configure-Reporting-Response
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureReportingStatus {
    pub status: ZclStatus,
    pub direction: u8,
    pub attr_id: u16,
}

/// One selector in a Read-Reporting-Configuration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingSelector {
    pub direction: u8,
    pub attr_id: u16,
}

/// One record in a Read-Reporting-Configuration response
///
/// Successful records carry the full configuration; failed ones only echo
/// the selector that was asked about.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingConfigResult {
    pub status: ZclStatus,
    pub selector: ReportingSelector,
    pub config: Option<ReportingConfig>,
}

/// Default-Response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultResponse {
    pub command_id: u8,
    pub status: ZclStatus,
}

/// A decoded general command
#[derive(Debug, Clone, PartialEq)]
pub enum GeneralCommand {
    ReadAttributes(Vec<u16>),
    ReadAttributesResponse(Vec<ReadAttributeRecord>),
    WriteAttributes(Vec<WriteAttributeRecord>),
    WriteAttributesUndivided(Vec<WriteAttributeRecord>),
    WriteAttributesResponse(Vec<WriteAttributeStatus>),
    WriteAttributesNoResponse(Vec<WriteAttributeRecord>),
    ConfigureReporting(Vec<ReportingConfig>),
    ConfigureReportingResponse(Vec<ConfigureReportingStatus>),
    ReadReportingConfig(Vec<ReportingSelector>),
    ReadReportingConfigResponse(Vec<ReportingConfigResult>),
    ReportAttributes(Vec<AttributeReport>),
    DefaultResponse(DefaultResponse),
    DiscoverAttributes {
        start: u16,
        max: u8,
    },
    DiscoverAttributesResponse {
        complete: bool,
        attributes: Vec<(u16, TypeId)>,
    },
    DiscoverCommandsReceived {
        start: u8,
        max: u8,
    },
    DiscoverCommandsReceivedResponse {
        complete: bool,
        commands: Vec<u8>,
    },
    DiscoverCommandsGenerated {
        start: u8,
        max: u8,
    },
    DiscoverCommandsGeneratedResponse {
        complete: bool,
        commands: Vec<u8>,
    },
    DiscoverAttributesExtended {
        start: u16,
        max: u8,
    },
    DiscoverAttributesExtendedResponse {
        complete: bool,
        /// (attribute id, type, access-control bitmap)
        attributes: Vec<(u16, TypeId, u8)>,
    },
}

impl GeneralCommand {
    pub fn id(&self) -> GeneralCommandId {
        match self {
            Self::ReadAttributes(_) => GeneralCommandId::ReadAttributes,
            Self::ReadAttributesResponse(_) => GeneralCommandId::ReadAttributesResponse,
            Self::WriteAttributes(_) => GeneralCommandId::WriteAttributes,
            Self::WriteAttributesUndivided(_) => GeneralCommandId::WriteAttributesUndivided,
            Self::WriteAttributesResponse(_) => GeneralCommandId::WriteAttributesResponse,
            Self::WriteAttributesNoResponse(_) => GeneralCommandId::WriteAttributesNoResponse,
            Self::ConfigureReporting(_) => GeneralCommandId::ConfigureReporting,
            Self::ConfigureReportingResponse(_) => GeneralCommandId::ConfigureReportingResponse,
            Self::ReadReportingConfig(_) => GeneralCommandId::ReadReportingConfig,
            Self::ReadReportingConfigResponse(_) => GeneralCommandId::ReadReportingConfigResponse,
            Self::ReportAttributes(_) => GeneralCommandId::ReportAttributes,
            Self::DefaultResponse(_) => GeneralCommandId::DefaultResponse,
            Self::DiscoverAttributes { .. } => GeneralCommandId::DiscoverAttributes,
            Self::DiscoverAttributesResponse { .. } => {
                GeneralCommandId::DiscoverAttributesResponse
            }
            Self::DiscoverCommandsReceived { .. } => GeneralCommandId::DiscoverCommandsReceived,
            Self::DiscoverCommandsReceivedResponse { .. } => {
                GeneralCommandId::DiscoverCommandsReceivedResponse
            }
            Self::DiscoverCommandsGenerated { .. } => GeneralCommandId::DiscoverCommandsGenerated,
            Self::DiscoverCommandsGeneratedResponse { .. } => {
                GeneralCommandId::DiscoverCommandsGeneratedResponse
            }
            Self::DiscoverAttributesExtended { .. } => GeneralCommandId::DiscoverAttributesExtended,
            Self::DiscoverAttributesExtendedResponse { .. } => {
                GeneralCommandId::DiscoverAttributesExtendedResponse
            }
        }
    }

    /// Serialize the command payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::ReadAttributes(attrs) => {
                for attr in attrs {
                    out.extend_from_slice(&attr.to_le_bytes());
                }
            }
            Self::ReadAttributesResponse(records) => {
                for record in records {
                    out.extend_from_slice(&record.attr_id.to_le_bytes());
                    out.push(record.status.to_u8());
                    if let Some(value) = &record.value {
                        value.encode_tagged(&mut out);
                    }
                }
            }
            Self::WriteAttributes(records)
            | Self::WriteAttributesUndivided(records)
            | Self::WriteAttributesNoResponse(records) => {
                for record in records {
                    out.extend_from_slice(&record.attr_id.to_le_bytes());
                    record.value.encode_tagged(&mut out);
                }
            }
            Self::WriteAttributesResponse(records) => {
                for record in records {
                    out.push(record.status.to_u8());
                    if let Some(attr_id) = record.attr_id {
                        out.extend_from_slice(&attr_id.to_le_bytes());
                    }
                }
            }
            Self::ConfigureReporting(configs) => {
                for config in configs {
                    config.encode(&mut out);
                }
            }
            Self::ConfigureReportingResponse(records) => {
                for record in records {
                    out.push(record.status.to_u8());
                    out.push(record.direction);
                    out.extend_from_slice(&record.attr_id.to_le_bytes());
                }
            }
            Self::ReadReportingConfig(selectors) => {
                for selector in selectors {
                    out.push(selector.direction);
                    out.extend_from_slice(&selector.attr_id.to_le_bytes());
                }
            }
            Self::ReadReportingConfigResponse(results) => {
                for result in results {
                    out.push(result.status.to_u8());
                    match &result.config {
                        Some(config) => config.encode(&mut out),
                        None => {
                            out.push(result.selector.direction);
                            out.extend_from_slice(&result.selector.attr_id.to_le_bytes());
                        }
                    }
                }
            }
            Self::ReportAttributes(reports) => {
                for report in reports {
                    out.extend_from_slice(&report.attr_id.to_le_bytes());
                    report.value.encode_tagged(&mut out);
                }
            }
            Self::DefaultResponse(response) => {
                out.push(response.command_id);
                out.push(response.status.to_u8());
            }
            Self::DiscoverAttributes { start, max }
            | Self::DiscoverAttributesExtended { start, max } => {
                out.extend_from_slice(&start.to_le_bytes());
                out.push(*max);
            }
            Self::DiscoverAttributesResponse {
                complete,
                attributes,
            } => {
                out.push(u8::from(*complete));
                for (attr_id, type_id) in attributes {
                    out.extend_from_slice(&attr_id.to_le_bytes());
                    out.push(*type_id as u8);
                }
            }
            Self::DiscoverCommandsReceived { start, max }
            | Self::DiscoverCommandsGenerated { start, max } => {
                out.push(*start);
                out.push(*max);
            }
            Self::DiscoverCommandsReceivedResponse { complete, commands }
            | Self::DiscoverCommandsGeneratedResponse { complete, commands } => {
                out.push(u8::from(*complete));
                out.extend_from_slice(commands);
            }
            Self::DiscoverAttributesExtendedResponse {
                complete,
                attributes,
            } => {
                out.push(u8::from(*complete));
                for (attr_id, type_id, access) in attributes {
                    out.extend_from_slice(&attr_id.to_le_bytes());
                    out.push(*type_id as u8);
                    out.push(*access);
                }
            }
        }
        out
    }

    /// Decode a command payload for a known command id
    pub fn decode(id: GeneralCommandId, buf: &[u8]) -> Result<Self, CodecError> {
        Ok(match id {
            GeneralCommandId::ReadAttributes => {
                let mut attrs = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (attr, r) = read_u16(rest)?;
                    attrs.push(attr);
                    rest = r;
                }
                Self::ReadAttributes(attrs)
            }
            GeneralCommandId::ReadAttributesResponse => {
                let mut records = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (attr_id, r) = read_u16(rest)?;
                    let (status_byte, r) = read_u8(r)?;
                    let status = ZclStatus::from_u8(status_byte);
                    let (value, r) = if status == ZclStatus::Success {
                        let (v, r) = ZclValue::decode_tagged(r)?;
                        (Some(v), r)
                    } else {
                        (None, r)
                    };
                    records.push(ReadAttributeRecord {
                        attr_id,
                        status,
                        value,
                    });
                    rest = r;
                }
                Self::ReadAttributesResponse(records)
            }
            GeneralCommandId::WriteAttributes
            | GeneralCommandId::WriteAttributesUndivided
            | GeneralCommandId::WriteAttributesNoResponse => {
                let mut records = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (attr_id, r) = read_u16(rest)?;
                    let (value, r) = ZclValue::decode_tagged(r)?;
                    records.push(WriteAttributeRecord { attr_id, value });
                    rest = r;
                }
                match id {
                    GeneralCommandId::WriteAttributes => Self::WriteAttributes(records),
                    GeneralCommandId::WriteAttributesUndivided => {
                        Self::WriteAttributesUndivided(records)
                    }
                    _ => Self::WriteAttributesNoResponse(records),
                }
            }
            GeneralCommandId::WriteAttributesResponse => {
                // All-success responses are a lone status byte with no attr id
                if buf.len() == 1 {
                    Self::WriteAttributesResponse(vec![WriteAttributeStatus {
                        status: ZclStatus::from_u8(buf[0]),
                        attr_id: None,
                    }])
                } else {
                    let mut records = Vec::new();
                    let mut rest = buf;
                    while !rest.is_empty() {
                        let (status, r) = read_u8(rest)?;
                        let (attr_id, r) = read_u16(r)?;
                        records.push(WriteAttributeStatus {
                            status: ZclStatus::from_u8(status),
                            attr_id: Some(attr_id),
                        });
                        rest = r;
                    }
                    Self::WriteAttributesResponse(records)
                }
            }
            GeneralCommandId::ConfigureReporting => {
                let mut configs = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (config, r) = ReportingConfig::decode(rest)?;
                    configs.push(config);
                    rest = r;
                }
                Self::ConfigureReporting(configs)
            }
            GeneralCommandId::ConfigureReportingResponse => {
                let mut records = Vec::new();
                let mut rest = buf;
                // An all-success response may be a lone status byte
                if rest.len() == 1 {
                    records.push(ConfigureReportingStatus {
                        status: ZclStatus::from_u8(rest[0]),
                        direction: 0,
                        attr_id: 0,
                    });
                } else {
                    while !rest.is_empty() {
                        let (status, r) = read_u8(rest)?;
                        let (direction, r) = read_u8(r)?;
                        let (attr_id, r) = read_u16(r)?;
                        records.push(ConfigureReportingStatus {
                            status: ZclStatus::from_u8(status),
                            direction,
                            attr_id,
                        });
                        rest = r;
                    }
                }
                Self::ConfigureReportingResponse(records)
            }
            GeneralCommandId::ReadReportingConfig => {
                let mut selectors = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (direction, r) = read_u8(rest)?;
                    let (attr_id, r) = read_u16(r)?;
                    selectors.push(ReportingSelector { direction, attr_id });
                    rest = r;
                }
                Self::ReadReportingConfig(selectors)
            }
            GeneralCommandId::ReadReportingConfigResponse => {
                let mut results = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (status_byte, r) = read_u8(rest)?;
                    let status = ZclStatus::from_u8(status_byte);
                    let (selector, config, r) = if status == ZclStatus::Success {
                        let (c, r) = ReportingConfig::decode(r)?;
                        (c.selector(), Some(c), r)
                    } else {
                        // Failed records still carry direction + attr id
                        let (direction, r) = read_u8(r)?;
                        let (attr_id, r) = read_u16(r)?;
                        (ReportingSelector { direction, attr_id }, None, r)
                    };
                    results.push(ReportingConfigResult {
                        status,
                        selector,
                        config,
                    });
                    rest = r;
                }
                Self::ReadReportingConfigResponse(results)
            }
            GeneralCommandId::ReportAttributes => {
                let mut reports = Vec::new();
                let mut rest = buf;
                while !rest.is_empty() {
                    let (attr_id, r) = read_u16(rest)?;
                    let (value, r) = ZclValue::decode_tagged(r)?;
                    reports.push(AttributeReport { attr_id, value });
                    rest = r;
                }
                Self::ReportAttributes(reports)
            }
            GeneralCommandId::DefaultResponse => {
                let (command_id, rest) = read_u8(buf)?;
                let (status, _) = read_u8(rest)?;
                Self::DefaultResponse(DefaultResponse {
                    command_id,
                    status: ZclStatus::from_u8(status),
                })
            }
            GeneralCommandId::DiscoverAttributes => {
                let (start, rest) = read_u16(buf)?;
                let (max, _) = read_u8(rest)?;
                Self::DiscoverAttributes { start, max }
            }
            GeneralCommandId::DiscoverAttributesResponse => {
                let (complete, mut rest) = read_u8(buf)?;
                let mut attributes = Vec::new();
                while !rest.is_empty() {
                    let (attr_id, r) = read_u16(rest)?;
                    let (type_code, r) = read_u8(r)?;
                    let type_id =
                        TypeId::from_u8(type_code).ok_or(CodecError::UnknownTypeCode(type_code))?;
                    attributes.push((attr_id, type_id));
                    rest = r;
                }
                Self::DiscoverAttributesResponse {
                    complete: complete != 0,
                    attributes,
                }
            }
            GeneralCommandId::DiscoverCommandsReceived
            | GeneralCommandId::DiscoverCommandsGenerated => {
                let (start, rest) = read_u8(buf)?;
                let (max, _) = read_u8(rest)?;
                if id == GeneralCommandId::DiscoverCommandsReceived {
                    Self::DiscoverCommandsReceived { start, max }
                } else {
                    Self::DiscoverCommandsGenerated { start, max }
                }
            }
            GeneralCommandId::DiscoverCommandsReceivedResponse
            | GeneralCommandId::DiscoverCommandsGeneratedResponse => {
                let (complete, rest) = read_u8(buf)?;
                let commands = rest.to_vec();
                if id == GeneralCommandId::DiscoverCommandsReceivedResponse {
                    Self::DiscoverCommandsReceivedResponse {
                        complete: complete != 0,
                        commands,
                    }
                } else {
                    Self::DiscoverCommandsGeneratedResponse {
                        complete: complete != 0,
                        commands,
                    }
                }
            }
            GeneralCommandId::DiscoverAttributesExtended => {
                let (start, rest) = read_u16(buf)?;
                let (max, _) = read_u8(rest)?;
                Self::DiscoverAttributesExtended { start, max }
            }
            GeneralCommandId::DiscoverAttributesExtendedResponse => {
                let (complete, mut rest) = read_u8(buf)?;
                let mut attributes = Vec::new();
                while !rest.is_empty() {
                    let (attr_id, r) = read_u16(rest)?;
                    let (type_code, r) = read_u8(r)?;
                    let type_id =
                        TypeId::from_u8(type_code).ok_or(CodecError::UnknownTypeCode(type_code))?;
                    let (access, r) = read_u8(r)?;
                    attributes.push((attr_id, type_id, access));
                    rest = r;
                }
                Self::DiscoverAttributesExtendedResponse {
                    complete: complete != 0,
                    attributes,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: GeneralCommand) {
        let encoded = command.encode();
        let decoded = GeneralCommand::decode(command.id(), &encoded).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_frame_control_roundtrip() {
        for byte in [0x00u8, 0x01, 0x04, 0x08, 0x10, 0x1D] {
            let control = FrameControl::from_byte(byte).unwrap();
            assert_eq!(control.to_byte(), byte);
        }
    }

    #[test]
    fn test_frame_parse_with_manufacturer_code() {
        // MS bit set: control, mfr code 0x117C (IKEA), tsn, cmd, payload
        let data = vec![0x05, 0x7C, 0x11, 0x2A, 0x00, 0xAA, 0xBB];
        let frame = ZclFrame::parse(&data).unwrap();
        assert_eq!(frame.header.manufacturer_code, Some(0x117C));
        assert_eq!(frame.header.tsn, 0x2A);
        assert_eq!(frame.header.command_id, 0x00);
        assert_eq!(frame.payload, vec![0xAA, 0xBB]);
        assert_eq!(frame.serialize(), data);
    }

    #[test]
    fn test_frame_too_short() {
        assert!(matches!(
            ZclFrame::parse(&[0x00, 0x01]),
            Err(CodecError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_read_attributes_roundtrip() {
        roundtrip(GeneralCommand::ReadAttributes(vec![0x0004, 0x0005]));
    }

    #[test]
    fn test_read_attributes_response_roundtrip() {
        roundtrip(GeneralCommand::ReadAttributesResponse(vec![
            ReadAttributeRecord {
                attr_id: 0x0004,
                status: ZclStatus::Success,
                value: Some(ZclValue::CharString(Some("IKEA of Sweden".into()))),
            },
            ReadAttributeRecord {
                attr_id: 0x0099,
                status: ZclStatus::UnsupportedAttribute,
                value: None,
            },
        ]));
    }

    #[test]
    fn test_write_attributes_roundtrip() {
        roundtrip(GeneralCommand::WriteAttributes(vec![WriteAttributeRecord {
            attr_id: 0x0010,
            value: ZclValue::Int16(-55),
        }]));
        roundtrip(GeneralCommand::WriteAttributesResponse(vec![
            WriteAttributeStatus {
                status: ZclStatus::Success,
                attr_id: None,
            },
        ]));
        roundtrip(GeneralCommand::WriteAttributesResponse(vec![
            WriteAttributeStatus {
                status: ZclStatus::ReadOnly,
                attr_id: Some(0x0010),
            },
            WriteAttributeStatus {
                status: ZclStatus::UnsupportedAttribute,
                attr_id: Some(0x0011),
            },
        ]));
    }

    #[test]
    fn test_configure_reporting_roundtrip() {
        roundtrip(GeneralCommand::ConfigureReporting(vec![
            ReportingConfig::Reported {
                attr_id: 0x0000,
                type_id: TypeId::Int16,
                min_interval: 10,
                max_interval: 300,
                reportable_change: Some(ZclValue::Int16(50)),
            },
            ReportingConfig::Reported {
                attr_id: 0x0001,
                type_id: TypeId::Bool,
                min_interval: 0,
                max_interval: 3600,
                reportable_change: None,
            },
            ReportingConfig::Received {
                attr_id: 0x0002,
                timeout: 120,
            },
        ]));
    }

    #[test]
    fn test_report_attributes_roundtrip() {
        roundtrip(GeneralCommand::ReportAttributes(vec![AttributeReport {
            attr_id: 0x0000,
            value: ZclValue::Uint8(0x2A),
        }]));
    }

    #[test]
    fn test_discover_roundtrips() {
        roundtrip(GeneralCommand::DiscoverAttributes {
            start: 0,
            max: 16,
        });
        roundtrip(GeneralCommand::DiscoverAttributesResponse {
            complete: true,
            attributes: vec![(0x0000, TypeId::Uint8), (0x0004, TypeId::CharString)],
        });
        roundtrip(GeneralCommand::DiscoverCommandsReceivedResponse {
            complete: false,
            commands: vec![0x00, 0x01, 0x02],
        });
        roundtrip(GeneralCommand::DiscoverAttributesExtendedResponse {
            complete: true,
            attributes: vec![(0x0000, TypeId::Uint8, 0x05)],
        });
    }

    #[test]
    fn test_default_response_echoes_tsn() {
        let request = ZclFrame::general(
            0x42,
            &GeneralCommand::WriteAttributes(vec![WriteAttributeRecord {
                attr_id: 0x0000,
                value: ZclValue::Uint8(1),
            }]),
            Direction::ClientToServer,
            None,
        );
        assert!(request.wants_default_response());

        let response = request.default_response(ZclStatus::Success);
        assert_eq!(response.header.tsn, 0x42);
        assert_eq!(response.header.control.direction, Direction::ServerToClient);
        assert!(response.header.control.disable_default_response);

        let decoded = response.general_command().unwrap();
        assert_eq!(
            decoded,
            GeneralCommand::DefaultResponse(DefaultResponse {
                command_id: GeneralCommandId::WriteAttributes as u8,
                status: ZclStatus::Success,
            })
        );
    }

    #[test]
    fn test_default_response_suppressed() {
        let mut request = ZclFrame::general(
            0x01,
            &GeneralCommand::ReadAttributes(vec![0x0000]),
            Direction::ClientToServer,
            None,
        );
        request.header.control.disable_default_response = true;
        assert!(!request.wants_default_response());

        // A default response never triggers another default response
        let response = request.default_response(ZclStatus::Success);
        assert!(!response.wants_default_response());
    }
}
