//! Database persistence
//!
//! A database is a line-oriented text stream, optionally gzip compressed,
//! holding one record per monitored path in lexicographic order. Readers and
//! writers own their stream for the whole of their lifetime.

pub mod codec;
mod location;
mod reader;
mod writer;

pub use codec::{Field, Header, FORMAT_VERSION};
pub use location::{DatabaseLocation, DatabaseRole};
pub use reader::DatabaseReader;
pub use writer::DatabaseWriter;

use crate::attributes::AttrSet;
use crate::entry::AttributeStateTree;
use crate::error::Result;

/// Load a whole database into memory
pub fn load(location: &DatabaseLocation) -> Result<AttributeStateTree> {
    DatabaseReader::open(location)?.read_all()
}

/// Write every entry of `tree`, returning the number of records written
pub fn store(location: &DatabaseLocation, tree: &AttributeStateTree, attrs: AttrSet) -> Result<usize> {
    let mut writer = DatabaseWriter::create(location, attrs)?;
    for entry in tree.iter() {
        writer.write_entry(entry)?;
    }
    writer.finish()
}
