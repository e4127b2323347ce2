//! ZDO (Zigbee Device Object) frames
//!
//! ZDO frames ride on endpoint 0 with profile 0x0000 and have a simple
//! shape: a 1-byte transaction sequence number followed by a request- or
//! response-specific payload. Responses use the request's cluster id with
//! the high bit set.

use crate::types::{read_u16, read_u32, read_u8, take, CodecError, Eui64};

/// ZDO success status; anything else is a failure code
pub const ZDO_SUCCESS: u8 = 0x00;

/// ZDO cluster ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ZdoCluster {
    NwkAddrReq = 0x0000,
    IeeeAddrReq = 0x0001,
    NodeDescReq = 0x0002,
    PowerDescReq = 0x0003,
    SimpleDescReq = 0x0004,
    ActiveEpReq = 0x0005,
    MatchDescReq = 0x0006,
    DeviceAnnce = 0x0013,
    BindReq = 0x0021,
    UnbindReq = 0x0022,
    MgmtLqiReq = 0x0031,
    MgmtRtgReq = 0x0032,
    MgmtLeaveReq = 0x0034,
    MgmtPermitJoiningReq = 0x0036,
    MgmtNwkUpdateReq = 0x0038,
}

impl ZdoCluster {
    /// The cluster id of the matching response frame
    pub fn response_id(self) -> u16 {
        self as u16 | 0x8000
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0000 => Self::NwkAddrReq,
            0x0001 => Self::IeeeAddrReq,
            0x0002 => Self::NodeDescReq,
            0x0003 => Self::PowerDescReq,
            0x0004 => Self::SimpleDescReq,
            0x0005 => Self::ActiveEpReq,
            0x0006 => Self::MatchDescReq,
            0x0013 => Self::DeviceAnnce,
            0x0021 => Self::BindReq,
            0x0022 => Self::UnbindReq,
            0x0031 => Self::MgmtLqiReq,
            0x0032 => Self::MgmtRtgReq,
            0x0034 => Self::MgmtLeaveReq,
            0x0036 => Self::MgmtPermitJoiningReq,
            0x0038 => Self::MgmtNwkUpdateReq,
            _ => return None,
        })
    }
}

/// Build the ASDU for an address-of-interest request (NodeDesc, PowerDesc,
/// ActiveEp: tsn + nwk)
pub fn addr_request(tsn: u8, nwk: u16) -> Vec<u8> {
    let mut asdu = vec![tsn];
    asdu.extend_from_slice(&nwk.to_le_bytes());
    asdu
}

/// Build the ASDU for a Simple-Descriptor request
pub fn simple_desc_request(tsn: u8, nwk: u16, endpoint: u8) -> Vec<u8> {
    let mut asdu = addr_request(tsn, nwk);
    asdu.push(endpoint);
    asdu
}

/// Build the ASDU for a Mgmt-Lqi or Mgmt-Rtg request
pub fn mgmt_table_request(tsn: u8, start_index: u8) -> Vec<u8> {
    vec![tsn, start_index]
}

/// Build the ASDU for a Mgmt-Permit-Joining request
pub fn permit_joining_request(tsn: u8, duration: u8, tc_significance: bool) -> Vec<u8> {
    vec![tsn, duration, u8::from(tc_significance)]
}

/// Build the ASDU for a Mgmt-Leave request
pub fn mgmt_leave_request(tsn: u8, ieee: Eui64, remove_children: bool, rejoin: bool) -> Vec<u8> {
    let mut asdu = vec![tsn];
    ieee.encode(&mut asdu);
    let mut flags = 0u8;
    if rejoin {
        flags |= 0x80;
    }
    if remove_children {
        flags |= 0x40;
    }
    asdu.push(flags);
    asdu
}

/// Build the ASDU for a Mgmt-NWK-Update request
pub fn nwk_update_request(
    tsn: u8,
    scan_channels: u32,
    scan_duration: u8,
    nwk_update_id: Option<u8>,
) -> Vec<u8> {
    let mut asdu = vec![tsn];
    asdu.extend_from_slice(&scan_channels.to_le_bytes());
    asdu.push(scan_duration);
    // scan_duration 0xFE/0xFF carry a channel/manager change with an update id
    if scan_duration >= 0xFE {
        asdu.push(nwk_update_id.unwrap_or(0));
    }
    asdu
}

/// A generic ZDO status-only response (Bind, Unbind, Mgmt-Leave,
/// Mgmt-Permit-Joining)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    pub tsn: u8,
    pub status: u8,
}

impl StatusResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, _) = read_u8(rest)?;
        Ok(Self { tsn, status })
    }

    pub fn serialize(&self) -> Vec<u8> {
        vec![self.tsn, self.status]
    }
}

/// Device announcement, ZDO cluster 0x0013
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAnnounce {
    pub tsn: u8,
    pub nwk: u16,
    pub ieee: Eui64,
    pub capability: u8,
}

impl DeviceAnnounce {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (nwk, rest) = read_u16(rest)?;
        let (ieee, rest) = Eui64::decode(rest)?;
        let (capability, _) = read_u8(rest)?;
        Ok(Self {
            tsn,
            nwk,
            ieee,
            capability,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn];
        asdu.extend_from_slice(&self.nwk.to_le_bytes());
        self.ieee.encode(&mut asdu);
        asdu.push(self.capability);
        asdu
    }

    /// Full-function device (router)
    pub fn is_router(&self) -> bool {
        (self.capability & 0x02) != 0
    }

    pub fn is_mains_powered(&self) -> bool {
        (self.capability & 0x04) != 0
    }

    pub fn rx_on_when_idle(&self) -> bool {
        (self.capability & 0x08) != 0
    }
}

/// Node descriptor, 13 packed fields over 13 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeDescriptor {
    pub logical_type: u8,
    pub complex_descriptor_available: bool,
    pub user_descriptor_available: bool,
    pub aps_flags: u8,
    pub frequency_band: u8,
    pub mac_capability_flags: u8,
    pub manufacturer_code: u16,
    pub max_buffer_size: u8,
    pub max_incoming_transfer_size: u16,
    pub server_mask: u16,
    pub max_outgoing_transfer_size: u16,
    pub descriptor_capability: u8,
}

impl NodeDescriptor {
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (head, rest) = take(buf, 13)?;
        Ok((
            Self {
                logical_type: head[0] & 0x07,
                complex_descriptor_available: (head[0] & 0x08) != 0,
                user_descriptor_available: (head[0] & 0x10) != 0,
                aps_flags: head[1] & 0x07,
                frequency_band: (head[1] >> 3) & 0x1F,
                mac_capability_flags: head[2],
                manufacturer_code: u16::from_le_bytes([head[3], head[4]]),
                max_buffer_size: head[5],
                max_incoming_transfer_size: u16::from_le_bytes([head[6], head[7]]),
                server_mask: u16::from_le_bytes([head[8], head[9]]),
                max_outgoing_transfer_size: u16::from_le_bytes([head[10], head[11]]),
                descriptor_capability: head[12],
            },
            rest,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut byte0 = self.logical_type & 0x07;
        if self.complex_descriptor_available {
            byte0 |= 0x08;
        }
        if self.user_descriptor_available {
            byte0 |= 0x10;
        }
        out.push(byte0);
        out.push((self.aps_flags & 0x07) | ((self.frequency_band & 0x1F) << 3));
        out.push(self.mac_capability_flags);
        out.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        out.push(self.max_buffer_size);
        out.extend_from_slice(&self.max_incoming_transfer_size.to_le_bytes());
        out.extend_from_slice(&self.server_mask.to_le_bytes());
        out.extend_from_slice(&self.max_outgoing_transfer_size.to_le_bytes());
        out.push(self.descriptor_capability);
    }

    /// 0 = coordinator, 1 = router, 2 = end device
    pub fn is_end_device(&self) -> bool {
        self.logical_type == 2
    }

    pub fn is_mains_powered(&self) -> bool {
        (self.mac_capability_flags & 0x04) != 0
    }
}

/// Power descriptor, four nibbles over two bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PowerDescriptor {
    pub current_power_mode: u8,
    pub available_power_sources: u8,
    pub current_power_source: u8,
    pub current_power_source_level: u8,
}

impl PowerDescriptor {
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (head, rest) = take(buf, 2)?;
        Ok((
            Self {
                current_power_mode: head[0] & 0x0F,
                available_power_sources: head[0] >> 4,
                current_power_source: head[1] & 0x0F,
                current_power_source_level: head[1] >> 4,
            },
            rest,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push((self.current_power_mode & 0x0F) | (self.available_power_sources << 4));
        out.push((self.current_power_source & 0x0F) | (self.current_power_source_level << 4));
    }
}

/// Power-Descriptor response, cluster 0x8003
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerDescResponse {
    pub tsn: u8,
    pub status: u8,
    pub nwk: u16,
    pub descriptor: Option<PowerDescriptor>,
}

impl PowerDescResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        let (nwk, rest) = read_u16(rest)?;
        let descriptor = if status == ZDO_SUCCESS {
            Some(PowerDescriptor::decode(rest)?.0)
        } else {
            None
        };
        Ok(Self {
            tsn,
            status,
            nwk,
            descriptor,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn, self.status];
        asdu.extend_from_slice(&self.nwk.to_le_bytes());
        if let Some(descriptor) = &self.descriptor {
            descriptor.encode(&mut asdu);
        }
        asdu
    }
}

/// Node-Descriptor response, cluster 0x8002
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescResponse {
    pub tsn: u8,
    pub status: u8,
    pub nwk: u16,
    pub descriptor: Option<NodeDescriptor>,
}

impl NodeDescResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        let (nwk, rest) = read_u16(rest)?;
        let descriptor = if status == ZDO_SUCCESS {
            Some(NodeDescriptor::decode(rest)?.0)
        } else {
            None
        };
        Ok(Self {
            tsn,
            status,
            nwk,
            descriptor,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn, self.status];
        asdu.extend_from_slice(&self.nwk.to_le_bytes());
        if let Some(descriptor) = &self.descriptor {
            descriptor.encode(&mut asdu);
        }
        asdu
    }
}

/// Active-Endpoints response, cluster 0x8005
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEpResponse {
    pub tsn: u8,
    pub status: u8,
    pub nwk: u16,
    pub endpoints: Vec<u8>,
}

impl ActiveEpResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        let (nwk, rest) = read_u16(rest)?;
        let endpoints = if status == ZDO_SUCCESS {
            let (count, rest) = read_u8(rest)?;
            let (eps, _) = take(rest, count as usize)?;
            eps.to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            tsn,
            status,
            nwk,
            endpoints,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn, self.status];
        asdu.extend_from_slice(&self.nwk.to_le_bytes());
        asdu.push(self.endpoints.len() as u8);
        asdu.extend_from_slice(&self.endpoints);
        asdu
    }
}

/// A simple descriptor: one application entity on an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_type: u16,
    pub device_version: u8,
    pub in_clusters: Vec<u16>,
    pub out_clusters: Vec<u16>,
}

impl SimpleDescriptor {
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (endpoint, rest) = read_u8(buf)?;
        let (profile_id, rest) = read_u16(rest)?;
        let (device_type, rest) = read_u16(rest)?;
        let (device_version, rest) = read_u8(rest)?;

        let (in_count, mut rest) = read_u8(rest)?;
        let mut in_clusters = Vec::with_capacity(in_count as usize);
        for _ in 0..in_count {
            let (cluster, r) = read_u16(rest)?;
            in_clusters.push(cluster);
            rest = r;
        }

        let (out_count, mut rest) = read_u8(rest)?;
        let mut out_clusters = Vec::with_capacity(out_count as usize);
        for _ in 0..out_count {
            let (cluster, r) = read_u16(rest)?;
            out_clusters.push(cluster);
            rest = r;
        }

        Ok((
            Self {
                endpoint,
                profile_id,
                device_type,
                device_version: device_version & 0x0F,
                in_clusters,
                out_clusters,
            },
            rest,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.endpoint);
        out.extend_from_slice(&self.profile_id.to_le_bytes());
        out.extend_from_slice(&self.device_type.to_le_bytes());
        out.push(self.device_version & 0x0F);
        out.push(self.in_clusters.len() as u8);
        for cluster in &self.in_clusters {
            out.extend_from_slice(&cluster.to_le_bytes());
        }
        out.push(self.out_clusters.len() as u8);
        for cluster in &self.out_clusters {
            out.extend_from_slice(&cluster.to_le_bytes());
        }
    }
}

/// Simple-Descriptor response, cluster 0x8004
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDescResponse {
    pub tsn: u8,
    pub status: u8,
    pub nwk: u16,
    pub descriptor: Option<SimpleDescriptor>,
}

impl SimpleDescResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        let (nwk, rest) = read_u16(rest)?;
        let descriptor = if status == ZDO_SUCCESS {
            let (_desc_len, rest) = read_u8(rest)?;
            Some(SimpleDescriptor::decode(rest)?.0)
        } else {
            None
        };
        Ok(Self {
            tsn,
            status,
            nwk,
            descriptor,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn, self.status];
        asdu.extend_from_slice(&self.nwk.to_le_bytes());
        if let Some(descriptor) = &self.descriptor {
            let mut body = Vec::new();
            descriptor.encode(&mut body);
            asdu.push(body.len() as u8);
            asdu.extend_from_slice(&body);
        }
        asdu
    }
}

/// Bind/unbind destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTarget {
    Group(u16),
    Unicast { ieee: Eui64, endpoint: u8 },
}

/// Bind or Unbind request payload (clusters 0x0021 / 0x0022)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    pub tsn: u8,
    pub src: Eui64,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub target: BindTarget,
}

impl BindRequest {
    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn];
        self.src.encode(&mut asdu);
        asdu.push(self.src_endpoint);
        asdu.extend_from_slice(&self.cluster_id.to_le_bytes());
        match self.target {
            BindTarget::Group(group) => {
                asdu.push(0x01);
                asdu.extend_from_slice(&group.to_le_bytes());
            }
            BindTarget::Unicast { ieee, endpoint } => {
                asdu.push(0x03);
                ieee.encode(&mut asdu);
                asdu.push(endpoint);
            }
        }
        asdu
    }

    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (src, rest) = Eui64::decode(rest)?;
        let (src_endpoint, rest) = read_u8(rest)?;
        let (cluster_id, rest) = read_u16(rest)?;
        let (mode, rest) = read_u8(rest)?;
        let target = match mode {
            0x01 => BindTarget::Group(read_u16(rest)?.0),
            0x03 => {
                let (ieee, rest) = Eui64::decode(rest)?;
                let (endpoint, _) = read_u8(rest)?;
                BindTarget::Unicast { ieee, endpoint }
            }
            other => {
                return Err(CodecError::InvalidFrame(format!(
                    "Invalid bind address mode: {other:#04x}"
                )))
            }
        };
        Ok(Self {
            tsn,
            src,
            src_endpoint,
            cluster_id,
            target,
        })
    }
}

/// One row of a Mgmt-Lqi neighbor table
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Neighbor {
    pub extended_pan_id: Eui64,
    pub ieee: Eui64,
    pub nwk: u16,
    /// 0 = coordinator, 1 = router, 2 = end device, 3 = unknown
    pub device_type: u8,
    /// 0 = off, 1 = on, 2 = unknown
    pub rx_on_when_idle: u8,
    /// 0 = parent, 1 = child, 2 = sibling, 3 = none, 4 = previous child
    pub relationship: u8,
    /// 0 = no, 1 = yes, 2 = unknown
    pub permit_joining: u8,
    pub depth: u8,
    pub lqi: u8,
}

impl Neighbor {
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (extended_pan_id, rest) = Eui64::decode(buf)?;
        let (ieee, rest) = Eui64::decode(rest)?;
        let (nwk, rest) = read_u16(rest)?;
        let (packed, rest) = read_u8(rest)?;
        let (permit, rest) = read_u8(rest)?;
        let (depth, rest) = read_u8(rest)?;
        let (lqi, rest) = read_u8(rest)?;
        Ok((
            Self {
                extended_pan_id,
                ieee,
                nwk,
                device_type: packed & 0x03,
                rx_on_when_idle: (packed >> 2) & 0x03,
                relationship: (packed >> 4) & 0x07,
                permit_joining: permit & 0x03,
                depth,
                lqi,
            },
            rest,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        self.extended_pan_id.encode(out);
        self.ieee.encode(out);
        out.extend_from_slice(&self.nwk.to_le_bytes());
        out.push(
            (self.device_type & 0x03)
                | ((self.rx_on_when_idle & 0x03) << 2)
                | ((self.relationship & 0x07) << 4),
        );
        out.push(self.permit_joining & 0x03);
        out.push(self.depth);
        out.push(self.lqi);
    }
}

/// Mgmt-Lqi response, cluster 0x8031
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgmtLqiResponse {
    pub tsn: u8,
    pub status: u8,
    pub total_entries: u8,
    pub start_index: u8,
    pub neighbors: Vec<Neighbor>,
}

impl MgmtLqiResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        if status != ZDO_SUCCESS {
            return Ok(Self {
                tsn,
                status,
                total_entries: 0,
                start_index: 0,
                neighbors: Vec::new(),
            });
        }
        let (total_entries, rest) = read_u8(rest)?;
        let (start_index, rest) = read_u8(rest)?;
        let (count, mut rest) = read_u8(rest)?;
        let mut neighbors = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (neighbor, r) = Neighbor::decode(rest)?;
            neighbors.push(neighbor);
            rest = r;
        }
        Ok(Self {
            tsn,
            status,
            total_entries,
            start_index,
            neighbors,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn, self.status];
        asdu.push(self.total_entries);
        asdu.push(self.start_index);
        asdu.push(self.neighbors.len() as u8);
        for neighbor in &self.neighbors {
            neighbor.encode(&mut asdu);
        }
        asdu
    }
}

/// One row of a Mgmt-Rtg routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Route {
    pub dst_nwk: u16,
    /// 0 = active, 1 = discovery underway, 2 = discovery failed, 3 = inactive
    pub route_status: u8,
    pub memory_constrained: bool,
    pub many_to_one: bool,
    pub route_record_required: bool,
    pub next_hop: u16,
}

impl Route {
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (dst_nwk, rest) = read_u16(buf)?;
        let (packed, rest) = read_u8(rest)?;
        let (next_hop, rest) = read_u16(rest)?;
        Ok((
            Self {
                dst_nwk,
                route_status: packed & 0x07,
                memory_constrained: (packed & 0x08) != 0,
                many_to_one: (packed & 0x10) != 0,
                route_record_required: (packed & 0x20) != 0,
                next_hop,
            },
            rest,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dst_nwk.to_le_bytes());
        let mut packed = self.route_status & 0x07;
        if self.memory_constrained {
            packed |= 0x08;
        }
        if self.many_to_one {
            packed |= 0x10;
        }
        if self.route_record_required {
            packed |= 0x20;
        }
        out.push(packed);
        out.extend_from_slice(&self.next_hop.to_le_bytes());
    }
}

/// Mgmt-Rtg response, cluster 0x8032
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgmtRtgResponse {
    pub tsn: u8,
    pub status: u8,
    pub total_entries: u8,
    pub start_index: u8,
    pub routes: Vec<Route>,
}

impl MgmtRtgResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        if status != ZDO_SUCCESS {
            return Ok(Self {
                tsn,
                status,
                total_entries: 0,
                start_index: 0,
                routes: Vec::new(),
            });
        }
        let (total_entries, rest) = read_u8(rest)?;
        let (start_index, rest) = read_u8(rest)?;
        let (count, mut rest) = read_u8(rest)?;
        let mut routes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (route, r) = Route::decode(rest)?;
            routes.push(route);
            rest = r;
        }
        Ok(Self {
            tsn,
            status,
            total_entries,
            start_index,
            routes,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut asdu = vec![self.tsn, self.status];
        asdu.push(self.total_entries);
        asdu.push(self.start_index);
        asdu.push(self.routes.len() as u8);
        for route in &self.routes {
            route.encode(&mut asdu);
        }
        asdu
    }
}

/// Mgmt-NWK-Update notify, cluster 0x8038
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NwkUpdateNotify {
    pub tsn: u8,
    pub status: u8,
    pub scanned_channels: u32,
    pub total_transmissions: u16,
    pub transmission_failures: u16,
    pub energy_values: Vec<u8>,
}

impl NwkUpdateNotify {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        let (scanned_channels, rest) = read_u32(rest)?;
        let (total_transmissions, rest) = read_u16(rest)?;
        let (transmission_failures, rest) = read_u16(rest)?;
        let (count, rest) = read_u8(rest)?;
        let (values, _) = take(rest, count as usize)?;
        Ok(Self {
            tsn,
            status,
            scanned_channels,
            total_transmissions,
            transmission_failures,
            energy_values: values.to_vec(),
        })
    }
}

/// NWK-Addr / IEEE-Addr response (single-device form)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrResponse {
    pub tsn: u8,
    pub status: u8,
    pub ieee: Eui64,
    pub nwk: u16,
}

impl AddrResponse {
    pub fn parse(asdu: &[u8]) -> Result<Self, CodecError> {
        let (tsn, rest) = read_u8(asdu)?;
        let (status, rest) = read_u8(rest)?;
        let (ieee, rest) = Eui64::decode(rest)?;
        let (nwk, _) = read_u16(rest)?;
        Ok(Self {
            tsn,
            status,
            ieee,
            nwk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_cluster_ids() {
        assert_eq!(ZdoCluster::NodeDescReq.response_id(), 0x8002);
        assert_eq!(ZdoCluster::ActiveEpReq.response_id(), 0x8005);
        assert_eq!(ZdoCluster::MgmtLqiReq.response_id(), 0x8031);
    }

    #[test]
    fn test_device_announce_roundtrip() {
        let announce = DeviceAnnounce {
            tsn: 0x81,
            nwk: 0x1234,
            ieee: Eui64::from(0x0011_2233_4455_6677),
            capability: 0x8E,
        };
        let parsed = DeviceAnnounce::parse(&announce.serialize()).unwrap();
        assert_eq!(parsed, announce);
        assert!(parsed.is_router());
        assert!(parsed.is_mains_powered());
        assert!(parsed.rx_on_when_idle());
    }

    #[test]
    fn test_node_descriptor_roundtrip() {
        let descriptor = NodeDescriptor {
            logical_type: 1,
            complex_descriptor_available: false,
            user_descriptor_available: false,
            aps_flags: 0,
            frequency_band: 8,
            mac_capability_flags: 0x8E,
            manufacturer_code: 4476,
            max_buffer_size: 82,
            max_incoming_transfer_size: 82,
            server_mask: 0,
            max_outgoing_transfer_size: 82,
            descriptor_capability: 0,
        };
        let response = NodeDescResponse {
            tsn: 1,
            status: ZDO_SUCCESS,
            nwk: 0x1234,
            descriptor: Some(descriptor),
        };
        let parsed = NodeDescResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_power_descriptor_roundtrip() {
        let response = PowerDescResponse {
            tsn: 4,
            status: ZDO_SUCCESS,
            nwk: 0x1234,
            descriptor: Some(PowerDescriptor {
                current_power_mode: 0,
                available_power_sources: 0x7,
                current_power_source: 0x1,
                current_power_source_level: 0xC,
            }),
        };
        let parsed = PowerDescResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_node_desc_failure_has_no_descriptor() {
        let response = NodeDescResponse {
            tsn: 1,
            status: 0x80, // INV_REQUESTTYPE
            nwk: 0x1234,
            descriptor: None,
        };
        let parsed = NodeDescResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed.descriptor, None);
    }

    #[test]
    fn test_simple_descriptor_roundtrip() {
        let response = SimpleDescResponse {
            tsn: 3,
            status: ZDO_SUCCESS,
            nwk: 0x1234,
            descriptor: Some(SimpleDescriptor {
                endpoint: 1,
                profile_id: 0x0104,
                device_type: 266,
                device_version: 1,
                in_clusters: vec![0, 3, 4, 5, 6, 8, 4096],
                out_clusters: vec![25],
            }),
        };
        let parsed = SimpleDescResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_active_endpoints_roundtrip() {
        let response = ActiveEpResponse {
            tsn: 2,
            status: ZDO_SUCCESS,
            nwk: 0x1234,
            endpoints: vec![1, 242],
        };
        let parsed = ActiveEpResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_bind_request_roundtrip() {
        let request = BindRequest {
            tsn: 9,
            src: Eui64::from(0xAABB_CCDD_EEFF_0011),
            src_endpoint: 1,
            cluster_id: 0x0006,
            target: BindTarget::Unicast {
                ieee: Eui64::from(0x1122_3344_5566_7788),
                endpoint: 1,
            },
        };
        assert_eq!(BindRequest::parse(&request.serialize()).unwrap(), request);

        let group_bind = BindRequest {
            target: BindTarget::Group(0x0002),
            ..request
        };
        assert_eq!(
            BindRequest::parse(&group_bind.serialize()).unwrap(),
            group_bind
        );
    }

    #[test]
    fn test_mgmt_lqi_roundtrip() {
        let response = MgmtLqiResponse {
            tsn: 5,
            status: ZDO_SUCCESS,
            total_entries: 2,
            start_index: 0,
            neighbors: vec![Neighbor {
                extended_pan_id: Eui64::from(0xDDDD_DDDD_DDDD_DDDD),
                ieee: Eui64::from(0x0011_2233_4455_6677),
                nwk: 0x1234,
                device_type: 1,
                rx_on_when_idle: 1,
                relationship: 2,
                permit_joining: 0,
                depth: 1,
                lqi: 180,
            }],
        };
        let parsed = MgmtLqiResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_mgmt_rtg_roundtrip() {
        let response = MgmtRtgResponse {
            tsn: 6,
            status: ZDO_SUCCESS,
            total_entries: 1,
            start_index: 0,
            routes: vec![Route {
                dst_nwk: 0x5678,
                route_status: 0,
                memory_constrained: false,
                many_to_one: true,
                route_record_required: false,
                next_hop: 0x9ABC,
            }],
        };
        let parsed = MgmtRtgResponse::parse(&response.serialize()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_mgmt_leave_request_flags() {
        let asdu = mgmt_leave_request(7, Eui64::from(0x1), false, true);
        assert_eq!(asdu[0], 7);
        assert_eq!(asdu[9], 0x80);
    }

    #[test]
    fn test_truncated_frames_fail() {
        assert!(DeviceAnnounce::parse(&[0x01, 0x34]).is_err());
        assert!(MgmtLqiResponse::parse(&[0x01]).is_err());
        assert!(SimpleDescResponse::parse(&[]).is_err());
    }
}
