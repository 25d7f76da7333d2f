///
/// Typed bind arguments.
///
/// A `BindArgument` describes one `?` placeholder value. Integers keep their
/// declared width and signedness so the binder can sign- or zero-extend them
/// to SQLite's 64-bit integer. Text and blob arguments borrow the caller's
/// bytes and carry a `BindMode` that decides whether SQLite copies them at
/// bind time or reads them in place while the execute call is running.
///

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// SQLite takes a private copy at bind time (`SQLITE_TRANSIENT`).
    #[default]
    Copy,
    /// SQLite reads the caller's buffer until the call returns (`SQLITE_STATIC`).
    Borrowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integer {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl Integer {
    /// Widens to SQLite's storage type. `U64` keeps its bit pattern.
    pub fn to_i64(self) -> i64 {
        match self {
            Integer::I8(v) => i64::from(v),
            Integer::I16(v) => i64::from(v),
            Integer::I32(v) => i64::from(v),
            Integer::I64(v) => v,
            Integer::U8(v) => i64::from(v),
            Integer::U16(v) => i64::from(v),
            Integer::U32(v) => i64::from(v),
            Integer::U64(v) => v as i64,
        }
    }
}

impl std::fmt::Display for Integer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Integer::I8(v) => write!(f, "{}", v),
            Integer::I16(v) => write!(f, "{}", v),
            Integer::I32(v) => write!(f, "{}", v),
            Integer::I64(v) => write!(f, "{}", v),
            Integer::U8(v) => write!(f, "{}", v),
            Integer::U16(v) => write!(f, "{}", v),
            Integer::U32(v) => write!(f, "{}", v),
            Integer::U64(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Float {
    F32(f32),
    F64(f64),
}

impl Float {
    pub fn to_f64(self) -> f64 {
        match self {
            Float::F32(v) => f64::from(v),
            Float::F64(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindArgument<'a> {
    Int(Integer),
    Float(Float),
    Text(&'a str, BindMode),
    Blob(&'a [u8], BindMode),
    Null,
}

impl<'a> BindArgument<'a> {
    pub fn text(value: &'a str) -> Self {
        BindArgument::Text(value, BindMode::Copy)
    }

    pub fn text_borrowed(value: &'a str) -> Self {
        BindArgument::Text(value, BindMode::Borrowed)
    }

    pub fn blob(value: &'a [u8]) -> Self {
        BindArgument::Blob(value, BindMode::Copy)
    }

    pub fn blob_borrowed(value: &'a [u8]) -> Self {
        BindArgument::Blob(value, BindMode::Borrowed)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            BindArgument::Int(_) => "integer",
            BindArgument::Float(_) => "float",
            BindArgument::Text(..) => "text",
            BindArgument::Blob(..) => "blob",
            BindArgument::Null => "null",
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for BindArgument<'_> {
                fn from(value: $ty) -> Self {
                    BindArgument::Int(Integer::$variant(value))
                }
            }
        )*
    };
}

impl_from_integer!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

impl From<f32> for BindArgument<'_> {
    fn from(value: f32) -> Self {
        BindArgument::Float(Float::F32(value))
    }
}

impl From<f64> for BindArgument<'_> {
    fn from(value: f64) -> Self {
        BindArgument::Float(Float::F64(value))
    }
}

impl From<bool> for BindArgument<'_> {
    fn from(value: bool) -> Self {
        BindArgument::Int(Integer::U8(u8::from(value)))
    }
}

impl<'a> From<&'a str> for BindArgument<'a> {
    fn from(value: &'a str) -> Self {
        BindArgument::text(value)
    }
}

impl<'a> From<&'a String> for BindArgument<'a> {
    fn from(value: &'a String) -> Self {
        BindArgument::text(value.as_str())
    }
}

impl<'a> From<&'a [u8]> for BindArgument<'a> {
    fn from(value: &'a [u8]) -> Self {
        BindArgument::blob(value)
    }
}

impl<'a> From<&'a Vec<u8>> for BindArgument<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        BindArgument::blob(value.as_slice())
    }
}

impl<'a, T> From<Option<T>> for BindArgument<'a>
where
    T: Into<BindArgument<'a>>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => BindArgument::Null,
        }
    }
}
