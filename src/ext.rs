use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::name::Encoding;
use crate::{Error, Result};

/// Longest serialized string the format accepts, counted in elements (bytes
/// for ASCII, code units for UTF-16), terminator included.
pub(crate) const MAX_STRING_LEN: u32 = 131072;

pub trait ReadExt {
    fn read_bool(&mut self) -> Result<bool>;
    fn read_hash(&mut self) -> Result<[u8; 20]>;
    fn read_len(&mut self, len: usize) -> Result<Vec<u8>>;
    /// Decodes one FString; `None` is the serialized null string.
    fn read_fstring(&mut self) -> Result<Option<(String, Encoding)>>;
    /// Decodes one FString, rejecting null.
    fn read_string(&mut self) -> Result<(String, Encoding)>;
}

pub trait WriteExt {
    fn write_bool(&mut self, value: bool) -> Result<()>;
    fn write_fstring(&mut self, value: Option<(&str, Encoding)>) -> Result<()>;
    fn write_string(&mut self, value: &str, encoding: Encoding) -> Result<()>;
}

impl<R: std::io::Read> ReadExt for R {
    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(Error::Serializer(format!(
                "got {value}, which is not a boolean"
            ))),
        }
    }

    fn read_hash(&mut self) -> Result<[u8; 20]> {
        let mut hash = [0; 20];
        self.read_exact(&mut hash)?;
        Ok(hash)
    }

    fn read_len(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_fstring(&mut self) -> Result<Option<(String, Encoding)>> {
        let len = self.read_i32::<LE>()?;
        if len == 0 {
            return Ok(None);
        }
        if len.unsigned_abs() > MAX_STRING_LEN {
            return Err(Error::Format(len));
        }
        Ok(Some(if len < 0 {
            let mut units = Vec::with_capacity(len.unsigned_abs() as usize);
            for _ in 0..len.unsigned_abs() {
                units.push(self.read_u16::<LE>()?);
            }
            // drop the terminator
            units.pop();
            (String::from_utf16(&units)?, Encoding::Utf16)
        } else {
            let mut bytes = self.read_len(len as usize)?;
            bytes.pop();
            (String::from_utf8(bytes)?, Encoding::Ascii)
        }))
    }

    fn read_string(&mut self) -> Result<(String, Encoding)> {
        self.read_fstring()?
            .ok_or_else(|| Error::Serializer("unexpected null string".to_string()))
    }
}

impl<W: std::io::Write> WriteExt for W {
    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)?;
        Ok(())
    }

    fn write_fstring(&mut self, value: Option<(&str, Encoding)>) -> Result<()> {
        match value {
            Some((value, encoding)) => self.write_string(value, encoding),
            None => {
                self.write_i32::<LE>(0)?;
                Ok(())
            }
        }
    }

    fn write_string(&mut self, value: &str, encoding: Encoding) -> Result<()> {
        match encoding {
            Encoding::Ascii => {
                self.write_i32::<LE>(value.len() as i32 + 1)?;
                self.write_all(value.as_bytes())?;
                self.write_u8(0)?;
            }
            Encoding::Utf16 => {
                let units: Vec<u16> = value.encode_utf16().collect();
                self.write_i32::<LE>(-(units.len() as i32 + 1))?;
                for unit in units {
                    self.write_u16::<LE>(unit)?;
                }
                self.write_u16::<LE>(0)?;
            }
        }
        Ok(())
    }
}
