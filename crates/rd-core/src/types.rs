//! Small cross-cutting value types shared between crates.

use std::net::IpAddr;

/// Peer announcement tuple exchanged by the discovery service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInfo {
    pub app_type: String,
    pub id: u32,
    pub ip: IpAddr,
    pub port: u16,
    pub version: String,
}

/// One enumerated capture source (a monitor or virtual display).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenInfo {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub x: i32,
    pub y: i32,
    pub name: String,
    pub is_primary: bool,
}
