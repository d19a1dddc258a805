use crate::error::Result;
use crate::protocol::r#trait::param::Param;

/// Parameter list of a COM_STMT_EXECUTE.
pub trait Params {
    /// Number of parameters
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write NULL bitmap: `(len + 7) / 8` bytes, bit set for NULL parameters.
    fn write_null_bitmap(&self, out: &mut Vec<u8>);

    /// Write the 2-byte type of every parameter.
    fn write_types(&self, out: &mut Vec<u8>);

    /// Write the binary values of the non-NULL parameters.
    fn write_values(&self, out: &mut Vec<u8>) -> Result<()>;
}

impl<T: Param> Params for [T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn write_null_bitmap(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.len().div_ceil(8), 0);
        for (idx, param) in self.iter().enumerate() {
            if param.is_null() {
                out[start + (idx >> 3)] |= 1 << (idx & 7);
            }
        }
    }

    fn write_types(&self, out: &mut Vec<u8>) {
        for param in self {
            param.encode_type(out);
        }
    }

    fn write_values(&self, out: &mut Vec<u8>) -> Result<()> {
        for param in self.iter().filter(|p| !p.is_null()) {
            param.encode_value(out)?;
        }
        Ok(())
    }
}
