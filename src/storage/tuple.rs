//! Owned tuple buffer in full-schema layout

use std::fmt;
use std::sync::Arc;

use crate::catalog::Schema;
use crate::error::{Result, StorageError};
use crate::types::Oid;

use super::value::Value;

/// A row detached from tile storage: `schema.tuple_length()` bytes, columns at their offsets
#[derive(Clone)]
pub struct Tuple {
    schema: Arc<Schema>,
    data: Vec<u8>,
}

impl Tuple {
    /// Zero-filled tuple
    pub fn new(schema: Arc<Schema>) -> Self {
        let data = vec![0; schema.tuple_length()];
        Self { schema, data }
    }

    pub fn from_values(schema: Arc<Schema>, values: &[Value]) -> Result<Self> {
        if values.len() != schema.column_count() {
            return Err(StorageError::Type(format!(
                "Expected {} values, got {}",
                schema.column_count(),
                values.len()
            )));
        }
        let mut tuple = Self::new(schema);
        for (col_id, value) in values.iter().enumerate() {
            tuple.set_value(col_id as Oid, value)?;
        }
        Ok(tuple)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn set_value(&mut self, col_id: Oid, value: &Value) -> Result<()> {
        let value_type = self.schema.column_type(col_id);
        let offset = self.schema.column_offset(col_id);
        value.encode(value_type, &mut self.data[offset..offset + value_type.length()])
    }

    pub fn get_value(&self, col_id: Oid) -> Value {
        Value::decode(self.schema.column_type(col_id), self.column_bytes(col_id))
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.schema.column_count() as Oid)
            .map(|col_id| self.get_value(col_id))
            .collect()
    }

    pub(crate) fn column_bytes(&self, col_id: Oid) -> &[u8] {
        let offset = self.schema.column_offset(col_id);
        let len = self.schema.column_type(col_id).length();
        &self.data[offset..offset + len]
    }

    pub(crate) fn column_bytes_mut(&mut self, col_id: Oid) -> &mut [u8] {
        let offset = self.schema.column_offset(col_id);
        let len = self.schema.column_type(col_id).length();
        &mut self.data[offset..offset + len]
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.data == other.data
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values()).finish()
    }
}
