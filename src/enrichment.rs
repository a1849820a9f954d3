//! GeoIP / ASN enrichment (spec.md §4.4, C4).
//!
//! The engine never bundles a MaxMind-style database itself — callers
//! inject a lookup callable, mirroring the `EventEnricher` seam the SIEM
//! transformation pipeline in the reference pack uses for its
//! `GeoIpEnricher`/`ThreatIntelEnricher` pair. Resolution, not lookup
//! implementation, lives here.

use crate::error::EnrichError;
use crate::event::{Event, Value};
use crate::model::IpSource;
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

fn ipv4_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsnInfo {
    pub asn: u32,
    pub organization: String,
}

/// Injected lookup for geolocation by IP.
pub trait GeoIpLookup: Send + Sync {
    fn lookup(&self, ip: Ipv4Addr) -> Option<GeoLocation>;
}

/// Injected lookup for ASN/org by IP.
pub trait AsnLookup: Send + Sync {
    fn lookup(&self, ip: Ipv4Addr) -> Option<AsnInfo>;
}

/// Resolve the IP address an enrichment stage should act on, per
/// spec.md §4.4: either the first IPv4-looking token in `_raw`, or a named
/// field (read as a structured string first, falling back to scanning its
/// display form for an IPv4 pattern).
pub fn resolve_ip(event: &Event, source: &IpSource) -> Result<Ipv4Addr, EnrichError> {
    match source {
        IpSource::FirstIpv4 => ipv4_regex()
            .captures(event.raw())
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<Ipv4Addr>().ok())
            .ok_or(EnrichError::NoIpResolved),
        IpSource::Field(name) => {
            let value = event.get(name).ok_or(EnrichError::NoIpResolved)?;
            if let Some(s) = value.as_str() {
                if let Ok(ip) = s.parse::<Ipv4Addr>() {
                    return Ok(ip);
                }
            }
            let display = value.to_display_string();
            ipv4_regex()
                .captures(&display)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<Ipv4Addr>().ok())
                .ok_or(EnrichError::NoIpResolved)
        }
    }
}

/// True for RFC 1918 private ranges and RFC 3927 link-local.
pub fn is_private_or_link_local(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local() || ip.is_loopback()
}

/// Applies geoip enrichment. Sets top-level `ip` to the resolved address (so
/// callers can see which address was resolved regardless of `ipSource`) plus
/// a nested `geo` map, per spec.md §8 S3: `{city:"X", ip:ip}`.
pub fn apply_geoip(event: &mut Event, source: &IpSource, lookup: &dyn GeoIpLookup) -> Result<(), EnrichError> {
    let ip = resolve_ip(event, source)?;
    event.set("ip", ip.to_string());
    if is_private_or_link_local(ip) {
        let mut map = std::collections::BTreeMap::new();
        map.insert("private".to_string(), Value::Bool(true));
        event.set("geo", Value::Map(map));
        return Ok(());
    }
    match lookup.lookup(ip) {
        Some(geo) => {
            let mut map = std::collections::BTreeMap::new();
            map.insert("country".to_string(), Value::String(geo.country));
            if let Some(region) = geo.region {
                map.insert("region".to_string(), Value::String(region));
            }
            if let Some(city) = geo.city {
                map.insert("city".to_string(), Value::String(city));
            }
            if let Some(lat) = geo.latitude {
                map.insert("lat".to_string(), Value::Float(lat));
            }
            if let Some(lon) = geo.longitude {
                map.insert("lon".to_string(), Value::Float(lon));
            }
            event.set("geo", Value::Map(map));
            Ok(())
        }
        None => Err(EnrichError::LookupFailed(format!("no geo record for {ip}"))),
    }
}

pub fn apply_asn(event: &mut Event, source: &IpSource, lookup: &dyn AsnLookup) -> Result<(), EnrichError> {
    let ip = resolve_ip(event, source)?;
    event.set("ip", ip.to_string());
    if is_private_or_link_local(ip) {
        let mut map = std::collections::BTreeMap::new();
        map.insert("private".to_string(), Value::Bool(true));
        event.set("asn", Value::Map(map));
        return Ok(());
    }
    match lookup.lookup(ip) {
        Some(info) => {
            let mut map = std::collections::BTreeMap::new();
            map.insert("number".to_string(), Value::Int(info.asn as i64));
            map.insert("organization".to_string(), Value::String(info.organization));
            event.set("asn", Value::Map(map));
            Ok(())
        }
        None => Err(EnrichError::LookupFailed(format!("no asn record for {ip}"))),
    }
}
