use crate::{DataType, RecordId, SchemaError, Value};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub data_type: DataType,
    pub name: Option<String>,
}

impl FieldDef {
    pub fn new(data_type: DataType, name: Option<String>) -> Self {
        Self { data_type, name }
    }
}

/// Schema of a tuple: an ordered list of typed, optionally named fields.
///
/// Two descriptors are equal when their type sequences match; names are
/// labels only and play no part in compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleDesc {
    fields: Vec<FieldDef>,
}

impl TupleDesc {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn from_types(types: impl IntoIterator<Item = DataType>) -> Self {
        Self::new(types.into_iter().map(|t| FieldDef::new(t, None)).collect())
    }

    pub fn named<'a>(fields: impl IntoIterator<Item = (DataType, &'a str)>) -> Self {
        Self::new(
            fields
                .into_iter()
                .map(|(t, name)| FieldDef::new(t, Some(name.to_string())))
                .collect(),
        )
    }

    /// Concatenation of two schemas, `a`'s fields first.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut fields = a.fields.clone();
        fields.extend(b.fields.iter().cloned());
        TupleDesc::new(fields)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_type(&self, index: usize) -> Option<DataType> {
        self.fields.get(index).map(|f| f.data_type)
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.fields.get(index).and_then(|f| f.name.as_deref())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }

    /// Bytes one tuple of this schema occupies on a page.
    pub fn byte_size(&self) -> usize {
        self.fields.iter().map(|f| f.data_type.byte_width()).sum()
    }

    pub fn types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.fields.iter().map(|f| f.data_type)
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.types().eq(other.types())
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &field.name {
                Some(name) => write!(f, "{}({})", field.data_type, name)?,
                None => write!(f, "{}", field.data_type)?,
            }
        }
        Ok(())
    }
}

/// A row of values conforming to a [`TupleDesc`], plus the location it was
/// read from or written to, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, values: Vec<Value>) -> Result<Self, SchemaError> {
        if values.len() != desc.num_fields() {
            return Err(SchemaError::ArityMismatch {
                expected: desc.num_fields(),
                actual: values.len(),
            });
        }

        for (value, data_type) in values.iter().zip(desc.types()) {
            if !value.type_compatible(&data_type) {
                return Err(SchemaError::Incompatible {
                    data_type,
                    value: value.clone(),
                });
            }
        }

        Ok(Self {
            desc,
            values,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn set_value(&mut self, index: usize, value: Value) -> Result<(), SchemaError> {
        let data_type = self
            .desc
            .field_type(index)
            .ok_or(SchemaError::FieldOutOfRange(index))?;
        if !value.type_compatible(&data_type) {
            return Err(SchemaError::Incompatible { data_type, value });
        }
        self.values[index] = value;
        Ok(())
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Writes exactly `desc().byte_size()` bytes.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), SchemaError> {
        for (value, data_type) in self.values.iter().zip(self.desc.types()) {
            value.encode(data_type, buf)?;
        }
        Ok(())
    }

    pub fn decode(desc: &Arc<TupleDesc>, buf: &mut impl Buf) -> Result<Self, SchemaError> {
        let values = desc
            .types()
            .map(|t| t.decode(buf))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            desc: Arc::clone(desc),
            values,
            record_id: None,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}
