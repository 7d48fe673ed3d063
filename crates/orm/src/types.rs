//! Wire types exchanged with a [`Connection`](crate::Connection).

/// A bound parameter or a returned column value.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum DataType {
    Int32(Option<i32>),
    Int64(Option<i64>),
    Uint32(Option<u32>),
    Uint64(Option<u64>),
    Float(Option<f32>),
    Double(Option<f64>),
    Str(Option<String>),
    Boolean(Option<bool>),
    /// `%Y-%m-%d`
    Date(Option<String>),
    /// `%H:%M:%S%.f`
    Time(Option<String>),
    /// `%Y-%m-%d %H:%M:%S%.f` or RFC 3339
    Timestamp(Option<String>),
    Binary(Option<Vec<u8>>),
}

impl DataType {
    /// Returns `true` for any `None` payload.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Boolean(None)
                | Self::Int32(None)
                | Self::Int64(None)
                | Self::Uint32(None)
                | Self::Uint64(None)
                | Self::Float(None)
                | Self::Double(None)
                | Self::Str(None)
                | Self::Binary(None)
                | Self::Date(None)
                | Self::Time(None)
                | Self::Timestamp(None)
        )
    }
}

/// A named column value within a [`Row`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name (or alias) as reported by the driver.
    pub name: String,
    /// Column value.
    pub value: DataType,
}

/// A single result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Position of the row within its result set.
    pub index: String,
    /// Column values in select order.
    pub fields: Vec<Field>,
}

impl Row {
    /// Returns the value of the named field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataType> {
        self.fields.iter().find(|field| field.name == name).map(|field| &field.value)
    }

    /// Removes the named field, returning its value.
    pub fn take(&mut self, name: &str) -> Option<DataType> {
        let pos = self.fields.iter().position(|field| field.name == name)?;
        Some(self.fields.remove(pos).value)
    }
}
