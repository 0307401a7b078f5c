//! Line codec for the database format.
//!
//! ```text
//! # fimguard database
//! @@db_spec 1 path,attr,ftype,perm,size,sha256
//! /etc/passwd,3f12,f,0644,1200,5e88...
//! @@end_db 1
//! ```

use crate::attributes::{AttrSet, AttrValue, Attribute, FileType};
use std::fmt;

/// Current database format version
pub const FORMAT_VERSION: u32 = 1;

pub const COMMENT_PREFIX: char = '#';
pub const DIRECTIVE_PREFIX: &str = "@@";
pub const SPEC_DIRECTIVE: &str = "@@db_spec";
pub const END_DIRECTIVE: &str = "@@end_db";
pub const DELIMITER: char = ',';

/// One column of a database record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Path,
    /// Requested attribute mask, lowercase hex
    Attr,
    Value(Attribute),
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Path => "path",
            Field::Attr => "attr",
            // attributes without a field name never become a Field
            Field::Value(a) => a.field_name().unwrap_or(""),
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        match name {
            "path" => Some(Field::Path),
            "attr" => Some(Field::Attr),
            other => Attribute::from_field_name(other).map(Field::Value),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed `@@db_spec` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub fields: Vec<Field>,
}

/// Why a header line was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    Version(String),
    Malformed(String),
}

impl Header {
    /// Field list for a database storing `attrs`: path and attr first, then
    /// every attribute with a field name in catalog order.
    pub fn for_attrs(attrs: AttrSet) -> Self {
        let mut fields = vec![Field::Path, Field::Attr];
        fields.extend(
            attrs
                .iter()
                .filter(|a| a.field_name().is_some())
                .map(Field::Value),
        );
        Self {
            version: FORMAT_VERSION,
            fields,
        }
    }

    pub fn parse(line: &str) -> Result<Self, HeaderError> {
        let mut parts = line.split_whitespace();
        if parts.next() != Some(SPEC_DIRECTIVE) {
            return Err(HeaderError::Malformed(format!(
                "expected '{}' header",
                SPEC_DIRECTIVE
            )));
        }
        let version = parts
            .next()
            .ok_or_else(|| HeaderError::Malformed("missing format version".to_string()))?;
        match version.parse::<u32>() {
            Ok(FORMAT_VERSION) => {}
            _ => return Err(HeaderError::Version(version.to_string())),
        }
        let list = parts
            .next()
            .ok_or_else(|| HeaderError::Malformed("missing field list".to_string()))?;
        if let Some(extra) = parts.next() {
            return Err(HeaderError::Malformed(format!(
                "unexpected token '{}' after field list",
                extra
            )));
        }

        let mut fields: Vec<Field> = Vec::new();
        for name in list.split(DELIMITER) {
            let field = Field::parse(name)
                .ok_or_else(|| HeaderError::Malformed(format!("unknown field '{}'", name)))?;
            if fields.contains(&field) {
                return Err(HeaderError::Malformed(format!("duplicate field '{}'", name)));
            }
            fields.push(field);
        }
        if fields.first() != Some(&Field::Path) {
            return Err(HeaderError::Malformed(
                "'path' must be the first field".to_string(),
            ));
        }
        Ok(Self {
            version: FORMAT_VERSION,
            fields,
        })
    }

    /// Attributes this header can carry values for
    pub fn stored_attrs(&self) -> AttrSet {
        self.fields.iter().fold(AttrSet::EMPTY, |acc, f| match f {
            Field::Value(a) => acc.with(*a),
            _ => acc,
        })
    }

    pub fn has_attr_field(&self) -> bool {
        self.fields.contains(&Field::Attr)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(Field::name).collect();
        write!(f, "{} {} {}", SPEC_DIRECTIVE, self.version, names.join(","))
    }
}

fn needs_escape(b: u8) -> bool {
    b == b'%' || b == DELIMITER as u8 || b.is_ascii_control()
}

/// Percent-escape delimiters, `%` and control characters
pub fn escape(raw: &str) -> String {
    if !raw.bytes().any(needs_escape) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        if c.is_ascii() && needs_escape(c as u8) {
            out.push_str(&format!("%{:02X}", c as u8));
        } else {
            out.push(c);
        }
    }
    out
}

pub fn unescape(field: &str) -> Result<String, String> {
    if !field.contains('%') {
        return Ok(field.to_string());
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let code = field
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| format!("invalid escape sequence at offset {}", i))?;
            out.push(code);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| "escaped value is not valid UTF-8".to_string())
}

pub fn encode_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Text(s) => escape(s),
        AttrValue::Number(n) => n.to_string(),
        AttrValue::Mode(m) => format!("{:04o}", m),
        AttrValue::Time(t) => t.to_string(),
        AttrValue::Digest(d) => hex::encode(d),
        AttrValue::FileType(t) => t.as_char().to_string(),
    }
}

/// Decode a non-empty field for `attr`
pub fn decode_value(attr: Attribute, raw: &str) -> Result<AttrValue, String> {
    let bad = |what: &str| format!("invalid {} for '{}': '{}'", what, attr, raw);
    match attr {
        Attribute::LinkName
        | Attribute::Acl
        | Attribute::Xattrs
        | Attribute::Selinux
        | Attribute::E2fsAttrs
        | Attribute::Capabilities => unescape(raw).map(AttrValue::Text),
        Attribute::Perm => u32::from_str_radix(raw, 8)
            .map(AttrValue::Mode)
            .map_err(|_| bad("octal mode")),
        Attribute::Uid
        | Attribute::Gid
        | Attribute::Size
        | Attribute::Inode
        | Attribute::BlockCount
        | Attribute::LinkCount
        | Attribute::Dev
        | Attribute::RDev => raw
            .parse::<u64>()
            .map(AttrValue::Number)
            .map_err(|_| bad("number")),
        Attribute::Atime | Attribute::Ctime | Attribute::Mtime => raw
            .parse::<i64>()
            .map(AttrValue::Time)
            .map_err(|_| bad("timestamp")),
        Attribute::FType => {
            let mut chars = raw.chars();
            match (chars.next().and_then(FileType::from_char), chars.next()) {
                (Some(t), None) => Ok(AttrValue::FileType(t)),
                _ => Err(bad("file type")),
            }
        }
        Attribute::Md5
        | Attribute::Sha1
        | Attribute::Sha256
        | Attribute::Sha512
        | Attribute::Blake3 => hex::decode(raw)
            .map(AttrValue::Digest)
            .map_err(|_| bad("digest")),
        Attribute::SizeGrowing => Err(format!("'{}' is not a stored attribute", attr)),
    }
}
