//! A `serde::Serializer` that writes MPD's `key: value\n` wire format
//! instead of JSON. Not a general-purpose serializer: it only implements
//! what the response DTOs in this crate actually use (flat structs, structs
//! nested in a `Vec`, newtype wrappers, unit-variant enums, `Option`).
//!
//! `Option::None` fields are dropped from the output entirely (MPD omits
//! unknown/absent fields rather than emitting them empty), implemented by
//! serializing each field into a scratch buffer first and only appending it
//! if non-empty.

use serde::ser::{self, Error as _, Impossible, Serialize};

use super::error::Error;

pub fn to_string<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    let mut out = String::new();
    value.serialize(Serializer { out: &mut out })?;
    Ok(out)
}

pub struct Serializer<'a> {
    out: &'a mut String,
}

impl<'a> ser::Serializer for Serializer<'a> {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = SeqSerializer<'a>;
    type SerializeTuple = Impossible<(), Error>;
    type SerializeTupleStruct = Impossible<(), Error>;
    type SerializeTupleVariant = Impossible<(), Error>;
    type SerializeMap = Impossible<(), Error>;
    type SerializeStruct = StructSerializer<'a>;
    type SerializeStructVariant = Impossible<(), Error>;

    fn serialize_bool(self, v: bool) -> Result<(), Error> {
        self.out.push(if v { '1' } else { '0' });
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_i16(self, v: i16) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_i32(self, v: i32) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_i64(self, v: i64) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_u8(self, v: u8) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_u16(self, v: u16) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_u32(self, v: u32) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }
    fn serialize_u64(self, v: u64) -> Result<(), Error> {
        self.out.push_str(&v.to_string());
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), Error> {
        self.out.push_str(&format!("{v:.3}"));
        Ok(())
    }
    fn serialize_f64(self, v: f64) -> Result<(), Error> {
        self.out.push_str(&format!("{v:.3}"));
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), Error> {
        self.out.push(v);
        Ok(())
    }
    fn serialize_str(self, v: &str) -> Result<(), Error> {
        self.out.push_str(v);
        Ok(())
    }
    fn serialize_bytes(self, _v: &[u8]) -> Result<(), Error> {
        Err(Error::custom("bytes are not representable in the MPD text format"))
    }

    fn serialize_none(self) -> Result<(), Error> {
        Ok(())
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Error> {
        Ok(())
    }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), Error> {
        Ok(())
    }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<(), Error> {
        self.out.push_str(variant);
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        self.out.push_str(variant);
        self.out.push(':');
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Error> {
        Ok(SeqSerializer { out: self.out })
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> {
        Err(Error::custom("tuples are not supported by the MPD response serializer"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Err(Error::custom("tuple structs are not supported by the MPD response serializer"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(Error::custom("tuple variants are not supported by the MPD response serializer"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> {
        Err(Error::custom("maps are not supported by the MPD response serializer"))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct, Error> {
        Ok(StructSerializer { out: self.out })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(Error::custom("struct variants are not supported by the MPD response serializer"))
    }
}

/// Writes each struct field as `Key: value\n`, skipping fields whose value
/// serialized to an empty string (our encoding of `Option::None`).
pub struct StructSerializer<'a> {
    out: &'a mut String,
}

impl<'a> ser::SerializeStruct for StructSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        let mut field = String::new();
        value.serialize(Serializer { out: &mut field })?;
        if !field.is_empty() {
            self.out.push_str(key);
            self.out.push_str(": ");
            self.out.push_str(&field);
            self.out.push('\n');
        }
        Ok(())
    }

    fn end(self) -> Result<(), Error> {
        Ok(())
    }
}

/// Concatenates each element's serialized form, one per line/block; structs
/// already end each field in `\n` so no extra separator is needed there,
/// while bare scalars (e.g. `Vec<String>` for `commands`) get one appended.
pub struct SeqSerializer<'a> {
    out: &'a mut String,
}

impl<'a> ser::SerializeSeq for SeqSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let mut element = String::new();
        value.serialize(Serializer { out: &mut element })?;
        self.out.push_str(&element);
        if !element.ends_with('\n') {
            self.out.push('\n');
        }
        Ok(())
    }

    fn end(self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Simple {
        a: u32,
        b: Option<u32>,
        c: bool,
    }

    #[test]
    fn skips_none_fields() {
        let out = to_string(&Simple { a: 1, b: None, c: true }).unwrap();
        assert_eq!(out, "a: 1\nc: 1\n");
    }

    #[test]
    fn keeps_some_fields() {
        let out = to_string(&Simple { a: 1, b: Some(2), c: false }).unwrap();
        assert_eq!(out, "a: 1\nb: 2\nc: 0\n");
    }

    #[test]
    fn seq_of_strings_gets_one_line_each() {
        let out = to_string(&vec!["command: play".to_string(), "command: stop".to_string()]).unwrap();
        assert_eq!(out, "command: play\ncommand: stop\n");
    }

    #[test]
    fn seq_of_structs_concatenates_field_blocks() {
        let items = vec![Simple { a: 1, b: None, c: true }, Simple { a: 2, b: Some(9), c: false }];
        let out = to_string(&items).unwrap();
        assert_eq!(out, "a: 1\nc: 1\na: 2\nb: 9\nc: 0\n");
    }
}
