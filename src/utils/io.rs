//! Bounds-checked big-endian reads for class file data.
//!
//! Every multi-byte quantity in JVM bytecode is stored big-endian. Reads never panic:
//! running off the end of the buffer is reported as [`crate::Error::Malformed`].

use crate::Result;

/// Numeric types that can be decoded from big-endian bytes.
pub trait JavaIO: Sized {
    /// The fixed-size byte array holding one encoded value.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Decodes a value from big-endian bytes.
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_java_io {
    ($($ty:ty),*) => {
        $(
            impl JavaIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }
            }
        )*
    };
}

impl_java_io!(u8, i8, u16, i16, u32, i32);

/// Reads a `T` at `offset` and advances the offset past it.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_be_at<T: JavaIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset
        .checked_add(type_len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed_error!("truncated bytecode at offset {}", offset))?;

    let Ok(bytes) = data[*offset..end].try_into() else {
        return Err(malformed_error!("truncated bytecode at offset {}", offset));
    };

    *offset = end;
    Ok(T::from_be_bytes(bytes))
}
