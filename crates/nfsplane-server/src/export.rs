//! Export entries and per-client net rules

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use nfsplane_core::ExportKey;
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Exported read-only
pub const NX_READONLY: u32 = 0x0001;
/// Exported to the world
pub const NX_DEFAULTEXPORT: u32 = 0x0002;
/// Map root access to the anonymous credential
pub const NX_MAPROOT: u32 = 0x0004;
/// Map all access to the anonymous credential
pub const NX_MAPALL: u32 = 0x0008;
/// Restrict directory cookies to 32 bits
pub const NX_32BITCLIENTS: u32 = 0x0020;
/// Export is offline
pub const NX_OFFLINE: u32 = 0x0040;
/// Return mangled names for names longer than 255 bytes
pub const NX_MANGLEDNAMES: u32 = 0x0080;

const NX_KNOWN: u32 = NX_READONLY
    | NX_DEFAULTEXPORT
    | NX_MAPROOT
    | NX_MAPALL
    | NX_32BITCLIENTS
    | NX_OFFLINE
    | NX_MANGLEDNAMES;

/// Maximum number of security flavors per rule.
pub const NX_MAX_SEC_FLAVORS: usize = 5;

/// Maximum supplementary groups in a mapped credential.
pub const MAX_MAPPED_GROUPS: usize = 16;

const NOBODY_UID: u32 = 65534;
const NOBODY_GID: u32 = 65534;

/// Export option flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Refuse mutating operations
    pub read_only: bool,
    /// Admit clients no net rule matches
    pub default_export: bool,
    /// Map root to the anonymous credential
    pub map_root: bool,
    /// Map every user to the anonymous credential
    pub map_all: bool,
    /// Restrict directory cookies to 32 bits
    pub cookies_32bit: bool,
    /// Export is offline
    pub offline: bool,
    /// Mangle names longer than 255 bytes
    pub mangled_names: bool,
}

impl ExportOptions {
    /// Read-only options.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Encodes as `NX_*` bits.
    pub fn to_bits(&self) -> u32 {
        let mut bits = 0;
        for (set, bit) in [
            (self.read_only, NX_READONLY),
            (self.default_export, NX_DEFAULTEXPORT),
            (self.map_root, NX_MAPROOT),
            (self.map_all, NX_MAPALL),
            (self.cookies_32bit, NX_32BITCLIENTS),
            (self.offline, NX_OFFLINE),
            (self.mangled_names, NX_MANGLEDNAMES),
        ] {
            if set {
                bits |= bit;
            }
        }
        bits
    }

    /// Decodes `NX_*` bits, rejecting unknown ones.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !NX_KNOWN != 0 {
            return Err(ExportError::invalid(format!(
                "unknown export option bits 0x{:x}",
                bits & !NX_KNOWN
            )));
        }
        Ok(Self {
            read_only: bits & NX_READONLY != 0,
            default_export: bits & NX_DEFAULTEXPORT != 0,
            map_root: bits & NX_MAPROOT != 0,
            map_all: bits & NX_MAPALL != 0,
            cookies_32bit: bits & NX_32BITCLIENTS != 0,
            offline: bits & NX_OFFLINE != 0,
            mangled_names: bits & NX_MANGLEDNAMES != 0,
        })
    }

    /// Combines export-wide options with a rule's options.
    pub fn merge(&self, rule: &ExportOptions) -> ExportOptions {
        ExportOptions::from_bits(self.to_bits() | rule.to_bits()).unwrap_or_default()
    }
}

/// Security flavor a client may authenticate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecFlavor {
    /// AUTH_NONE
    None,
    /// AUTH_SYS
    Sys,
    /// Kerberos v5, authentication only
    Krb5,
    /// Kerberos v5 with integrity
    Krb5i,
    /// Kerberos v5 with privacy
    Krb5p,
}

impl SecFlavor {
    /// Every flavor, weakest first.
    pub const ALL: [SecFlavor; 5] = [
        SecFlavor::None,
        SecFlavor::Sys,
        SecFlavor::Krb5,
        SecFlavor::Krb5i,
        SecFlavor::Krb5p,
    ];

    /// RPC flavor number.
    pub fn as_u32(self) -> u32 {
        match self {
            SecFlavor::None => 0,
            SecFlavor::Sys => 1,
            SecFlavor::Krb5 => 390003,
            SecFlavor::Krb5i => 390004,
            SecFlavor::Krb5p => 390005,
        }
    }

    /// Parses an RPC flavor number.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SecFlavor::None),
            1 => Some(SecFlavor::Sys),
            390003 => Some(SecFlavor::Krb5),
            390004 => Some(SecFlavor::Krb5i),
            390005 => Some(SecFlavor::Krb5p),
            _ => None,
        }
    }
}

/// Credential substituted for mapped users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedCredential {
    /// User id
    pub uid: u32,
    /// Primary group id
    pub gid: u32,
    /// Supplementary groups
    #[serde(default)]
    pub groups: Vec<u32>,
}

impl MappedCredential {
    /// The anonymous `nobody` credential.
    pub fn nobody() -> Self {
        Self {
            uid: NOBODY_UID,
            gid: NOBODY_GID,
            groups: vec![],
        }
    }
}

impl Default for MappedCredential {
    fn default() -> Self {
        Self::nobody()
    }
}

fn default_flavors() -> Vec<SecFlavor> {
    vec![SecFlavor::Sys]
}

/// One client network allowed to use an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetRule {
    /// Network address
    pub address: IpAddr,
    /// Network mask, same family as `address`
    pub mask: IpAddr,
    /// Options granted to matching clients
    #[serde(default)]
    pub options: ExportOptions,
    /// Credential for mapped users
    #[serde(default)]
    pub credential: MappedCredential,
    /// Permitted security flavors in preference order
    #[serde(default = "default_flavors")]
    pub sec_flavors: Vec<SecFlavor>,
}

impl NetRule {
    /// Rule for `address`/`mask` with default options.
    pub fn new(address: IpAddr, mask: IpAddr) -> Self {
        Self {
            address,
            mask,
            options: ExportOptions::default(),
            credential: MappedCredential::nobody(),
            sec_flavors: default_flavors(),
        }
    }

    /// Rule matching every IPv4 client.
    pub fn any_v4() -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        )
    }

    /// Parses `addr/prefix` or a bare address.
    pub fn parse_cidr(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let address = IpAddr::from_str(addr.trim())
            .map_err(|e| ExportError::invalid(format!("bad address {:?}: {}", addr, e)))?;
        let width = family_width(&address);
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u32>()
                .map_err(|e| ExportError::invalid(format!("bad prefix {:?}: {}", p, e)))?,
            None => width,
        };
        if prefix > width {
            return Err(ExportError::invalid(format!(
                "prefix /{} too long for {}",
                prefix, address
            )));
        }
        Ok(Self::new(address, prefix_to_mask(&address, prefix)))
    }

    /// Sets the rule options.
    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// Marks the rule read-only.
    pub fn read_only(mut self) -> Self {
        self.options.read_only = true;
        self
    }

    /// Sets the mapped credential.
    pub fn with_credential(mut self, credential: MappedCredential) -> Self {
        self.credential = credential;
        self
    }

    /// Sets the permitted security flavors.
    pub fn with_flavors(mut self, flavors: Vec<SecFlavor>) -> Self {
        self.sec_flavors = flavors;
        self
    }

    /// Mask length in bits.
    pub fn prefix_len(&self) -> u32 {
        to_bits(&self.mask).0.count_ones()
    }

    /// Checks family agreement, mask contiguity and list bounds.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_ipv4() != self.mask.is_ipv4() {
            return Err(ExportError::invalid(format!(
                "mask {} does not match the family of {}",
                self.mask, self.address
            )));
        }
        let (mask, width) = to_bits(&self.mask);
        let ones = mask.count_ones();
        if mask != prefix_bits(ones, width) {
            return Err(ExportError::invalid(format!(
                "mask {} is not contiguous",
                self.mask
            )));
        }
        if self.sec_flavors.len() > NX_MAX_SEC_FLAVORS {
            return Err(ExportError::invalid(format!(
                "{} security flavors, at most {} allowed",
                self.sec_flavors.len(),
                NX_MAX_SEC_FLAVORS
            )));
        }
        if self.credential.groups.len() > MAX_MAPPED_GROUPS {
            return Err(ExportError::invalid(format!(
                "mapped credential has {} groups, at most {} allowed",
                self.credential.groups.len(),
                MAX_MAPPED_GROUPS
            )));
        }
        Ok(())
    }

    /// True iff `client` lies inside this rule's network.
    ///
    /// IPv4-mapped IPv6 clients are matched against IPv4 rules.
    pub fn matches(&self, client: IpAddr) -> bool {
        let client = normalize(client);
        if client.is_ipv4() != self.address.is_ipv4() {
            return false;
        }
        let (addr, _) = to_bits(&self.address);
        let (mask, _) = to_bits(&self.mask);
        let (client, _) = to_bits(&client);
        client & mask == addr & mask
    }

    /// True iff some address matches both rules.
    pub fn overlaps(&self, other: &NetRule) -> bool {
        if self.address.is_ipv4() != other.address.is_ipv4() {
            return false;
        }
        let (a, _) = to_bits(&self.address);
        let (b, _) = to_bits(&other.address);
        let (ma, _) = to_bits(&self.mask);
        let (mb, _) = to_bits(&other.mask);
        let common = ma & mb;
        a & common == b & common
    }

    /// First permitted flavor the client offers.
    pub fn negotiate(&self, offered: &[SecFlavor]) -> Option<SecFlavor> {
        let permitted: &[SecFlavor] = if self.sec_flavors.is_empty() {
            &[SecFlavor::Sys]
        } else {
            &self.sec_flavors
        };
        permitted.iter().copied().find(|f| offered.contains(f))
    }
}

fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn family_width(addr: &IpAddr) -> u32 {
    if addr.is_ipv4() {
        32
    } else {
        128
    }
}

fn to_bits(addr: &IpAddr) -> (u128, u32) {
    match addr {
        IpAddr::V4(v4) => (u32::from(*v4) as u128, 32),
        IpAddr::V6(v6) => (u128::from(*v6), 128),
    }
}

fn prefix_bits(prefix: u32, width: u32) -> u128 {
    let full: u128 = if width == 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    };
    if prefix == 0 {
        return 0;
    }
    if prefix >= width {
        return full;
    }
    full & !(full >> prefix)
}

fn prefix_to_mask(addr: &IpAddr, prefix: u32) -> IpAddr {
    let bits = prefix_bits(prefix, family_width(addr));
    match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::from(bits)),
    }
}

/// One published filesystem subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Filesystem id
    pub fs_id: u32,
    /// Export id
    pub export_id: u32,
    /// Path of the exported filesystem
    pub fs_path: String,
    /// Exported sub-path inside the filesystem
    #[serde(default)]
    pub export_path: String,
    /// Export-wide options
    #[serde(default)]
    pub options: ExportOptions,
    /// Credential used for clients admitted by the default export
    #[serde(default)]
    pub default_credential: MappedCredential,
    /// Flavors permitted to clients admitted by the default export
    #[serde(default = "default_flavors")]
    pub default_sec_flavors: Vec<SecFlavor>,
    /// Net rules in registration order
    #[serde(default)]
    pub net_rules: Vec<NetRule>,
}

impl ExportEntry {
    /// Creates an entry with no rules.
    pub fn new(fs_id: u32, export_id: u32, fs_path: &str) -> Self {
        Self {
            fs_id,
            export_id,
            fs_path: fs_path.to_string(),
            export_path: String::new(),
            options: ExportOptions::default(),
            default_credential: MappedCredential::nobody(),
            default_sec_flavors: default_flavors(),
            net_rules: vec![],
        }
    }

    /// Sets the exported sub-path.
    pub fn with_export_path(mut self, path: &str) -> Self {
        self.export_path = path.to_string();
        self
    }

    /// Sets the export-wide options.
    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// Appends a net rule.
    pub fn with_rule(mut self, rule: NetRule) -> Self {
        self.net_rules.push(rule);
        self
    }

    /// Table key.
    pub fn key(&self) -> ExportKey {
        ExportKey::new(self.fs_id, self.export_id)
    }

    /// Full path clients mount.
    pub fn full_path(&self) -> String {
        let sub = self.export_path.trim_matches('/');
        if sub.is_empty() {
            self.fs_path.clone()
        } else {
            format!("{}/{}", self.fs_path.trim_end_matches('/'), sub)
        }
    }

    /// Validates paths, every rule, and rule consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.fs_path.starts_with('/') {
            return Err(ExportError::invalid(format!(
                "filesystem path {:?} is not absolute",
                self.fs_path
            )));
        }
        if self.export_path.split('/').any(|c| c == "..") {
            return Err(ExportError::invalid(format!(
                "export path {:?} escapes the filesystem",
                self.export_path
            )));
        }
        if self.default_sec_flavors.len() > NX_MAX_SEC_FLAVORS {
            return Err(ExportError::invalid(format!(
                "{} default security flavors, at most {} allowed",
                self.default_sec_flavors.len(),
                NX_MAX_SEC_FLAVORS
            )));
        }
        for rule in &self.net_rules {
            rule.validate()?;
        }
        for (i, a) in self.net_rules.iter().enumerate() {
            for (j, b) in self.net_rules.iter().enumerate().skip(i + 1) {
                if a.overlaps(b) && a.options != b.options {
                    return Err(ExportError::ConflictingRules {
                        first: i,
                        second: j,
                    });
                }
            }
        }
        Ok(())
    }
}
