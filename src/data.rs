//! Traits and impls used to read/write data to/from the wire.

use core::{
	marker::PhantomData,
	fmt,
	};

/**
	trait for data types than can be packed/unpacked to/from a PDU, an SDO or the process image
*/
pub trait PduData: Sized {
    type Packed: Storage;

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()>;
    fn unpack(src: &[u8]) -> PackingResult<Self>;

    fn packed_size() -> usize  {Self::Packed::LEN}
    fn packed_bitsize() -> usize {Self::Packed::LEN*8}
}

/** Enum to identify and raise adapted error raised by this package
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PackingError {
    BadSize(usize, &'static str),
    InvalidValue(&'static str),
}

pub type PackingResult<T> = Result<T, PackingError>;


/// this trait is an equivalent to `packed_struct::ByteArray` but since rust doesn't actually support using generic consts in const expressions, we do not have choice
pub trait Storage: AsRef<[u8]> + AsMut<[u8]> {
    const LEN: usize;
    fn zeroed() -> Self;
}
impl<const N: usize> Storage for [u8; N] {
    const LEN: usize = N;
    fn zeroed() -> Self {[0; N]}
}

impl<const N: usize> PduData for [u8; N] {
	type Packed = Self;

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
        if dst.len() < N
            {return Err(PackingError::BadSize(dst.len(), "not enough space for desired slice"))}
        dst[.. N].copy_from_slice(self);
        Ok(())
    }
	fn unpack(src: &[u8]) -> PackingResult<Self>  {
        src.get(.. N)
            .and_then(|src| Self::try_from(src).ok())
            .ok_or(PackingError::BadSize(src.len(), "not enough bytes for desired slice"))
	}
}

impl PduData for () {
	type Packed = [u8; 0];

	fn pack(&self, _dst: &mut [u8]) -> PackingResult<()>  {Ok(())}
	fn unpack(_src: &[u8]) -> PackingResult<Self>  {Ok(())}
}

impl PduData for bool {
	type Packed = [u8; 1];

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()>  {
        if dst.len() < Self::Packed::LEN
            {return Err(PackingError::BadSize(dst.len(), "no space for bool"))}
        dst[0] = if *self {0b1} else {0b0};
        Ok(())
	}
	fn unpack(src: &[u8]) -> PackingResult<Self>  {
        if src.len() < Self::Packed::LEN
            {return Err(PackingError::BadSize(src.len(), "no byte for bool"))}
		Ok(src[0] & 0b1 == 0b1)
	}
}

/// macro implementing [PduData] for a given struct generated with `bilge`, the struct must be `Copy` and have a native integer size
macro_rules! bilge_pdudata {
    ($t: ty, $id: ident) => { impl crate::data::PduData for $t {
        type Packed = [u8; core::mem::size_of::<$id>()];

        fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
            let size = dst.len();
            let dst = dst.get_mut(.. core::mem::size_of::<$id>())
                .ok_or(crate::data::PackingError::BadSize(size, "bilge struct needs exact size"))?;
            dst.copy_from_slice(&$id::from(*self).to_le_bytes());
            Ok(())
        }
        fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
            let bytes = src.get(.. core::mem::size_of::<$id>())
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or(crate::data::PackingError::BadSize(src.len(), "bilge struct needs exact size"))?;
            <$t>::try_from($id::from_le_bytes(bytes))
                .map_err(|_|  crate::data::PackingError::InvalidValue(concat!("invalid bits for ", stringify!($t))))
        }
    }};
}
pub(crate) use bilge_pdudata;

/// macro implementing [PduData] for numeric types
macro_rules! num_pdudata {
	($t: ty) => { impl crate::data::PduData for $t {
            type Packed = [u8; core::mem::size_of::<$t>()];

            fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
                let size = dst.len();
                let dst = dst.get_mut(.. core::mem::size_of::<$t>())
                    .ok_or(crate::data::PackingError::BadSize(size, "not enough space for integer"))?;
				dst.copy_from_slice(&self.to_le_bytes());
				Ok(())
			}
			fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
				Ok(Self::from_le_bytes(src
                    .get(.. core::mem::size_of::<$t>())
                    .and_then(|bytes| bytes.try_into().ok())
					.ok_or(crate::data::PackingError::BadSize(src.len(), "not enough bytes for integer"))?
					))
			}
		}};
}

num_pdudata!(u8);
num_pdudata!(u16);
num_pdudata!(u32);
num_pdudata!(u64);
num_pdudata!(i8);
num_pdudata!(i16);
num_pdudata!(i32);
num_pdudata!(i64);
num_pdudata!(f32);
num_pdudata!(f64);



/**
	locate some data in a datagram by its byte position and length, which must be extracted to type `T` to be processed in rust

	It acts like a getter/setter of a value in a byte sequence. One can think of it as an offset to a data location because it does not actually point the data but only its offset in the byte sequence, it also contains its length to dynamically check memory bounds.
*/
#[derive(Default, Eq, Hash)]
pub struct Field<T: PduData> {
    /// this is only here to mark that T is actually used
	extracted: PhantomData<T>,
	/// start byte index of the object
	pub byte: usize,
	/// byte length of the object
	pub len: usize,
}
impl<T: PduData> Field<T>
{
	/// build a Field from its byte offset and byte length
	pub const fn new(byte: usize, len: usize) -> Self {
		Self{extracted: PhantomData, byte, len}
	}
	/// build a Field from its byte offset, infering its length from the data nominal size
	pub const fn simple(byte: usize) -> Self {
        Self{extracted: PhantomData, byte, len: T::Packed::LEN}
	}
	/// byte index right after the field
	pub const fn end(&self) -> usize {self.byte + self.len}

	/// extract the value pointed by the field in the given byte array
	pub fn get(&self, data: &[u8]) -> T       {
		self.try_get(data).expect("cannot unpack from data")
	}
	/// dump the given value to the place pointed by the field in the byte array
	pub fn set(&self, data: &mut [u8], value: T)   {
        self.try_set(data, value).expect("cannot pack data")
	}
	/// same as [Self::get] but report out of bounds or invalid data
	pub fn try_get(&self, data: &[u8]) -> PackingResult<T> {
        let src = data.get(self.byte .. self.end())
            .ok_or(PackingError::BadSize(data.len(), "field out of data bounds"))?;
		T::unpack(src)
	}
	/// same as [Self::set] but report out of bounds
	pub fn try_set(&self, data: &mut [u8], value: T) -> PackingResult<()> {
        let size = data.len();
        let dst = data.get_mut(self.byte .. self.byte + self.len)
            .ok_or(PackingError::BadSize(size, "field out of data bounds"))?;
		value.pack(dst)
	}
}
impl<T: PduData> fmt::Debug for Field<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Field{{0x{:x}, {}}}", self.byte, self.len)
	}
}
// [Clone] and [Copy] must be implemented manually to allow copying a field pointing to a type which does not implement this operation
impl<T: PduData> Clone for Field<T> {
    fn clone(&self) -> Self   {Self::new(self.byte, self.len)}
}
impl<T: PduData> Copy for Field<T> {}
impl<T: PduData> PartialEq for Field<T> {
    fn eq(&self, other: &Self) -> bool {
        self.byte == other.byte && self.len == other.len
    }
}



/** helper to read/write sequencial data from/to a byte slice

    It is close to what [std::io::Cursor] is doing, but this struct allows reading forward without consuming the stream, and returns slices without copying the data. It is also meant to work with [PduData]

    Depending on the mutability of the slice this struct is built on, different capabilities are provided.
*/
pub struct Cursor<T> {
    position: usize,
    data: T,
}
impl<T> Cursor<T> {
    /// create a new cursor starting at position zero in the given slice
    pub fn new(data: T) -> Self   {Self{position: 0, data}}
    /** current position in the read/write slice

    bytes before this position are considered read or written, and bytes after are coming for use in next read/write calls
    */
    pub fn position(&self) -> usize   {self.position}
}
impl<'a> Cursor<&'a [u8]> {
    /// read the next coming bytes with a [PduData] value, and increment the position
    pub fn unpack<T: PduData>(&mut self) -> PackingResult<T> {
        let value = T::unpack(self.remain())?;
        self.position += T::Packed::LEN;
        Ok(value)
    }
    /// read the next coming `size` bytes and increment the position
    pub fn read(&mut self, size: usize) -> PackingResult<&'a [u8]> {
        let data: &'a [u8] = self.data;
        let read = data.get(self.position .. self.position + size)
            .ok_or(PackingError::BadSize(size, "not enough bytes remaining"))?;
        self.position += size;
        Ok(read)
    }
    /// return all the remaining bytes after current position, but does not advance the cursor
    pub fn remain(&self) -> &'a [u8] {
        let data: &'a [u8] = self.data;
        &data[self.position.min(data.len()) ..]
    }
    /// consume self and return a slice until current position
    pub fn finish(self) -> &'a [u8] {
        let data: &'a [u8] = self.data;
        &data[.. self.position]
    }
}
impl<'a> Cursor<&'a mut [u8]> {
    /// read the next coming bytes with a [PduData] value, and increment the position
    pub fn unpack<T: PduData>(&mut self) -> PackingResult<T> {
        let value = T::unpack(self.remain())?;
        self.position += T::Packed::LEN;
        Ok(value)
    }
    /// write the next coming bytes with a [PduData] value, and increment the position
    pub fn pack<T: PduData>(&mut self, value: &T) -> PackingResult<()> {
        value.pack(self.remain())?;
        self.position += T::Packed::LEN;
        Ok(())
    }
    /// write the next coming bytes with the given slice, and increment the position
    pub fn write(&mut self, value: &[u8]) -> PackingResult<()> {
        let position = self.position;
        self.data.get_mut(position .. position + value.len())
            .ok_or(PackingError::BadSize(value.len(), "not enough space remaining"))?
            .copy_from_slice(value);
        self.position += value.len();
        Ok(())
    }
    /// return all the remaining bytes after current position, but does not advance the cursor
    pub fn remain(&mut self) -> &'_ mut [u8] {
        let start = self.position.min(self.data.len());
        &mut self.data[start ..]
    }
    /// consume self and return a slice until current position
    pub fn finish(self) -> &'a mut [u8] {
        let Cursor {position, data} = self;
        &mut data[.. position]
    }
}
