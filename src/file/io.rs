//! Safe little-endian primitive access for module images and CIL bytecode.
//!
//! [`CilIO`] abstracts over the fixed-size primitives found in images and method bodies so
//! that [`read_le_at`] and [`write_le_at`] can share one bounds-checked implementation.
//! Everything in a module image is little-endian; there is no big-endian path.

use crate::Result;

/// Trait for implementing type-specific safe binary data reading operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array for the primitive.
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $n:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $n];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
);

/// Safely reads a value of type `T` in little-endian byte order from `data` at `offset`,
/// advancing the offset by the size of `T`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are not enough bytes left.
///
/// # Examples
///
/// ```rust
/// use dotpatch::file::io::read_le_at;
///
/// let data = [0x01, 0x00, 0x02, 0x00];
/// let mut offset = 0;
/// assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 1);
/// assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 2);
/// assert_eq!(offset, 4);
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely writes `value` in little-endian byte order into `data` at `offset`, advancing the
/// offset. Used to patch operands of already encoded instructions in place.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_le_primitives() {
        let data = [0xFF, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut offset = 0;
        assert_eq!(read_le_at::<i8>(&data, &mut offset).unwrap(), -1);
        assert_eq!(read_le_at::<u64>(&data, &mut offset).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(offset, 9);
    }

    #[test]
    fn test_read_le_out_of_bounds() {
        let data = [0x01, 0x02, 0x03];
        let mut offset = 0;
        assert!(matches!(
            read_le_at::<u32>(&data, &mut offset),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(offset, 0);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&data, &mut offset).is_err());
    }

    #[test]
    fn test_write_le_in_place() {
        let mut data = [0u8; 6];
        let mut offset = 1;
        write_le_at(&mut data, &mut offset, 0x0A00_0003u32).unwrap();
        assert_eq!(data, [0x00, 0x03, 0x00, 0x00, 0x0A, 0x00]);
        assert_eq!(offset, 5);

        assert!(write_le_at(&mut data, &mut offset, 0u16).is_err());
    }
}
