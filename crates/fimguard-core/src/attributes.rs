//! Attribute catalog
//!
//! Every monitorable property of a filesystem entry is an [`Attribute`] with a
//! fixed bit position. Monitored sets are [`AttrSet`] bitsets; the captured
//! state of one attribute is an [`AttrValue`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Attributes
// ============================================================================

/// What kind of probe an attribute needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Plain `lstat` metadata or link target
    Core,
    /// Content digest, needs a full read of the file
    Hash,
    /// OS specific probe (ACL, SELinux, xattrs, ...)
    Platform,
    /// Changes how other attributes are compared, carries no value
    Policy,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Hash => "hash",
            Self::Platform => "platform",
            Self::Policy => "policy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Attribute {
    LinkName = 0,
    Perm,
    Uid,
    Gid,
    Size,
    /// Size may grow between runs without being reported
    SizeGrowing,
    Atime,
    Ctime,
    Mtime,
    Inode,
    BlockCount,
    LinkCount,
    Dev,
    RDev,
    FType,
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
    Acl,
    Xattrs,
    Selinux,
    E2fsAttrs,
    Capabilities,
}

/// One row of the catalog
#[derive(Debug, Clone, Copy)]
pub struct AttributeInfo {
    pub attr: Attribute,
    /// Name used in group expressions
    pub config_name: &'static str,
    /// Column name in the database header; `None` for policy flags
    pub field_name: Option<&'static str>,
    pub capability: Capability,
    /// Whether this build can probe the attribute
    pub available: bool,
}

const fn row(
    attr: Attribute,
    config_name: &'static str,
    field_name: Option<&'static str>,
    capability: Capability,
    available: bool,
) -> AttributeInfo {
    AttributeInfo {
        attr,
        config_name,
        field_name,
        capability,
        available,
    }
}

/// The catalog, indexed by bit position
pub const CATALOG: [AttributeInfo; 25] = [
    row(Attribute::LinkName, "l", Some("lname"), Capability::Core, true),
    row(Attribute::Perm, "p", Some("perm"), Capability::Core, true),
    row(Attribute::Uid, "u", Some("uid"), Capability::Core, true),
    row(Attribute::Gid, "g", Some("gid"), Capability::Core, true),
    row(Attribute::Size, "s", Some("size"), Capability::Core, true),
    row(Attribute::SizeGrowing, "S", None, Capability::Policy, true),
    row(Attribute::Atime, "a", Some("atime"), Capability::Core, true),
    row(Attribute::Ctime, "c", Some("ctime"), Capability::Core, true),
    row(Attribute::Mtime, "m", Some("mtime"), Capability::Core, true),
    row(Attribute::Inode, "i", Some("inode"), Capability::Core, true),
    row(Attribute::BlockCount, "b", Some("bcount"), Capability::Core, true),
    row(Attribute::LinkCount, "n", Some("lcount"), Capability::Core, true),
    row(Attribute::Dev, "d", Some("dev"), Capability::Core, true),
    row(Attribute::RDev, "r", Some("rdev"), Capability::Core, true),
    row(Attribute::FType, "ftype", Some("ftype"), Capability::Core, true),
    row(Attribute::Md5, "md5", Some("md5"), Capability::Hash, false),
    row(Attribute::Sha1, "sha1", Some("sha1"), Capability::Hash, false),
    row(Attribute::Sha256, "sha256", Some("sha256"), Capability::Hash, true),
    row(Attribute::Sha512, "sha512", Some("sha512"), Capability::Hash, true),
    row(Attribute::Blake3, "blake3", Some("blake3"), Capability::Hash, true),
    row(Attribute::Acl, "acl", Some("acl"), Capability::Platform, false),
    row(Attribute::Xattrs, "xattrs", Some("xattrs"), Capability::Platform, false),
    row(Attribute::Selinux, "selinux", Some("selinux"), Capability::Platform, false),
    row(Attribute::E2fsAttrs, "e2fsattrs", Some("e2fsattrs"), Capability::Platform, false),
    row(Attribute::Capabilities, "caps", Some("caps"), Capability::Platform, false),
];

impl Attribute {
    pub const ALL: [Attribute; 25] = [
        Attribute::LinkName,
        Attribute::Perm,
        Attribute::Uid,
        Attribute::Gid,
        Attribute::Size,
        Attribute::SizeGrowing,
        Attribute::Atime,
        Attribute::Ctime,
        Attribute::Mtime,
        Attribute::Inode,
        Attribute::BlockCount,
        Attribute::LinkCount,
        Attribute::Dev,
        Attribute::RDev,
        Attribute::FType,
        Attribute::Md5,
        Attribute::Sha1,
        Attribute::Sha256,
        Attribute::Sha512,
        Attribute::Blake3,
        Attribute::Acl,
        Attribute::Xattrs,
        Attribute::Selinux,
        Attribute::E2fsAttrs,
        Attribute::Capabilities,
    ];

    pub fn bit(self) -> u32 {
        self as u32
    }

    pub fn info(self) -> &'static AttributeInfo {
        &CATALOG[self as usize]
    }

    pub fn config_name(self) -> &'static str {
        self.info().config_name
    }

    pub fn field_name(self) -> Option<&'static str> {
        self.info().field_name
    }

    pub fn capability(self) -> Capability {
        self.info().capability
    }

    pub fn is_available(self) -> bool {
        self.info().available
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        CATALOG.iter().find(|r| r.config_name == name).map(|r| r.attr)
    }

    pub fn from_field_name(name: &str) -> Option<Self> {
        CATALOG
            .iter()
            .find(|r| r.field_name == Some(name))
            .map(|r| r.attr)
    }

    fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.get(bit as usize).copied()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name().unwrap_or(self.config_name()))
    }
}

// ============================================================================
// AttrSet
// ============================================================================

/// Fixed-width attribute bitset
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttrSet(u64);

impl AttrSet {
    pub const EMPTY: AttrSet = AttrSet(0);

    pub const fn from_bits(bits: u64) -> Self {
        AttrSet(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn of(attrs: &[Attribute]) -> Self {
        attrs.iter().fold(Self::EMPTY, |acc, a| acc.with(*a))
    }

    pub const fn with(self, attr: Attribute) -> Self {
        AttrSet(self.0 | (1u64 << attr as u32))
    }

    pub const fn without(self, attr: Attribute) -> Self {
        AttrSet(self.0 & !(1u64 << attr as u32))
    }

    pub const fn contains(self, attr: Attribute) -> bool {
        self.0 & (1u64 << attr as u32) != 0
    }

    pub const fn union(self, other: AttrSet) -> Self {
        AttrSet(self.0 | other.0)
    }

    pub const fn intersection(self, other: AttrSet) -> Self {
        AttrSet(self.0 & other.0)
    }

    pub const fn difference(self, other: AttrSet) -> Self {
        AttrSet(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_superset(self, other: AttrSet) -> bool {
        other.difference(self).is_empty()
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Attributes in bit order
    pub fn iter(self) -> impl Iterator<Item = Attribute> {
        (0..64u32)
            .filter(move |b| self.0 & (1u64 << b) != 0)
            .filter_map(Attribute::from_bit)
    }

    /// Every attribute this build can probe
    pub fn available() -> Self {
        Attribute::ALL
            .iter()
            .filter(|a| a.is_available())
            .fold(Self::EMPTY, |acc, a| acc.with(*a))
    }

    pub fn hashes(self) -> Self {
        self.filter(|a| a.capability() == Capability::Hash)
    }

    pub fn unavailable(self) -> Self {
        self.filter(|a| !a.is_available())
    }

    fn filter(self, pred: impl Fn(Attribute) -> bool) -> Self {
        self.iter()
            .filter(|a| pred(*a))
            .fold(Self::EMPTY, |acc, a| acc.with(a))
    }
}

impl From<Attribute> for AttrSet {
    fn from(attr: Attribute) -> Self {
        AttrSet::EMPTY.with(attr)
    }
}

impl fmt::Debug for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|a| a.config_name())).finish()
    }
}

impl fmt::Display for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|a| a.config_name()).collect();
        f.write_str(&names.join("+"))
    }
}

// ============================================================================
// File types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub const ALL: [FileType; 7] = [
        Self::Regular,
        Self::Directory,
        Self::Symlink,
        Self::BlockDevice,
        Self::CharDevice,
        Self::Fifo,
        Self::Socket,
    ];

    pub fn as_char(&self) -> char {
        match self {
            Self::Regular => 'f',
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::BlockDevice => 'b',
            Self::CharDevice => 'c',
            Self::Fifo => 'p',
            Self::Socket => 's',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'f' => Some(Self::Regular),
            'd' => Some(Self::Directory),
            'l' => Some(Self::Symlink),
            'b' => Some(Self::BlockDevice),
            'c' => Some(Self::CharDevice),
            'p' => Some(Self::Fifo),
            's' => Some(Self::Socket),
            _ => None,
        }
    }

    pub fn from_std(ft: std::fs::FileType) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_block_device() {
                return Self::BlockDevice;
            }
            if ft.is_char_device() {
                return Self::CharDevice;
            }
            if ft.is_fifo() {
                return Self::Fifo;
            }
            if ft.is_socket() {
                return Self::Socket;
            }
        }
        if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_dir() {
            Self::Directory
        } else {
            Self::Regular
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

// ============================================================================
// Values
// ============================================================================

/// Typed value of one captured attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Number(u64),
    /// Permission bits (`0o7777` mask)
    Mode(u32),
    /// Seconds since the Unix epoch
    Time(i64),
    Digest(Vec<u8>),
    FileType(FileType),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Mode(m) => write!(f, "{:04o}", m),
            Self::Time(t) => match DateTime::<Utc>::from_timestamp(*t, 0) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S %z")),
                None => write!(f, "{}", t),
            },
            Self::Digest(d) => f.write_str(&hex::encode(d)),
            Self::FileType(t) => write!(f, "{}", t),
        }
    }
}
