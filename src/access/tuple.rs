use crate::access::value::{Field, Type};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

/// Location of a tuple: the page it lives on and its slot. Slot numbers stay
/// stable for the life of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.page_id
            .cmp(&other.page_id)
            .then(self.slot.cmp(&other.slot))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

/// Schema of a tuple: ordered field types with optional names.
///
/// Two descriptors are equal when their field types match; names are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: Vec<Type>, names: Vec<Option<String>>) -> Self {
        let names = names.into_iter().chain(std::iter::repeat(None));
        Self {
            items: types
                .into_iter()
                .zip(names)
                .map(|(field_type, name)| TdItem { field_type, name })
                .collect(),
        }
    }

    pub fn from_types(types: Vec<Type>) -> Self {
        Self::new(types, Vec::new())
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Option<Type> {
        self.items.get(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).and_then(|item| item.name.as_deref())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    pub fn types(&self) -> impl Iterator<Item = Type> + '_ {
        self.items.iter().map(|item| item.field_type)
    }

    /// Fixed width of one encoded tuple.
    pub fn byte_size(&self) -> usize {
        self.types().map(|t| t.byte_len()).sum()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.types().eq(other.types())
    }
}

impl Eq for TupleDesc {}

/// A row: field values conforming to a descriptor, plus the record id once
/// the tuple has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> StorageResult<Self> {
        if fields.len() != desc.num_fields()
            || !fields.iter().map(Field::field_type).eq(desc.types())
        {
            return Err(StorageError::SchemaMismatch);
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Writes the fixed-width encoding (`desc.byte_size()` bytes).
    pub fn encode(&self, writer: &mut impl Write) -> io::Result<()> {
        for field in &self.fields {
            field.encode(writer)?;
        }
        Ok(())
    }

    pub fn decode(desc: Arc<TupleDesc>, data: &[u8]) -> StorageResult<Self> {
        let mut cursor = Cursor::new(data);
        let fields = desc
            .types()
            .map(|t| t.decode(&mut cursor))
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }
}
