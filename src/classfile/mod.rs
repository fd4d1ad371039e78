//! Classfile data model along with the streaming reader and writer over it.

pub mod attribute;
pub mod binary;
pub mod constants;
pub mod instructions;
pub mod reader;
pub mod writer;

use crate::errors::{Error, FormatError};
use attribute::Attribute;
use binary::{ByteCursor, Serialize};
use byteorder::WriteBytesExt;
use constants::{ClassConstantIndex, ConstantIndex, ConstantPool, Utf8ConstantIndex};

/// First four bytes of every classfile
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Classfile version, headed by the major version for ordering
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    /// Oldest version produced when writing (older inputs are upgraded)
    pub const JAVA5: Version = Version { major: 49, minor: 0 };

    /// First version where the verifier requires a `StackMapTable`
    pub const JAVA6: Version = Version { major: 50, minor: 0 };

    pub const JAVA8: Version = Version { major: 52, minor: 0 };
}

bitflags::bitflags! {
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags::bitflags! {
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags::bitflags! {
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

impl Serialize for ClassAccessFlags {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

impl Serialize for FieldAccessFlags {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

impl Serialize for MethodAccessFlags {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

/// Parsed classfile
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// `None` only for `java/lang/Object`
    pub super_class: Option<ClassConstantIndex>,

    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse a whole classfile, requiring that nothing trails the final attribute
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut cursor = ByteCursor::new(bytes);

        let magic = cursor.u32()?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic { found: magic }.into());
        }
        let minor = cursor.u16()?;
        let major = cursor.u16()?;
        if major < 45 {
            return Err(FormatError::UnsupportedVersion { major, minor }.into());
        }

        let constants = ConstantPool::parse(&mut cursor)?;

        let access_flags = ClassAccessFlags::from_bits_truncate(cursor.u16()?);
        let this_class = ClassConstantIndex(ConstantIndex(cursor.u16()?));
        let super_class = match cursor.u16()? {
            0 => None,
            index => Some(ClassConstantIndex(ConstantIndex(index))),
        };

        let interface_count = cursor.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(ClassConstantIndex(ConstantIndex(cursor.u16()?)));
        }

        let field_count = cursor.u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Field::parse(&mut cursor)?);
        }

        let method_count = cursor.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Method::parse(&mut cursor)?);
        }

        let attributes = parse_attributes(&mut cursor)?;

        if cursor.remaining() != 0 {
            return Err(FormatError::TrailingBytes {
                found: cursor.remaining(),
            }
            .into());
        }

        Ok(ClassFile {
            version: Version { major, minor },
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Serialize the whole classfile to a byte buffer
    pub fn into_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        MAGIC.serialize(writer)?;
        self.version.minor.serialize(writer)?;
        self.version.major.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            None => 0u16.serialize(writer)?,
            Some(super_class) => super_class.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Field {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Field, Error> {
        let access_flags = FieldAccessFlags::from_bits_truncate(cursor.u16()?);
        let name = Utf8ConstantIndex(ConstantIndex(cursor.u16()?));
        let descriptor = Utf8ConstantIndex(ConstantIndex(cursor.u16()?));
        let attributes = parse_attributes(cursor)?;
        Ok(Field {
            access_flags,
            name,
            descriptor,
            attributes,
        })
    }
}

impl Serialize for Field {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Method {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Method, Error> {
        let access_flags = MethodAccessFlags::from_bits_truncate(cursor.u16()?);
        let name = Utf8ConstantIndex(ConstantIndex(cursor.u16()?));
        let descriptor = Utf8ConstantIndex(ConstantIndex(cursor.u16()?));
        let attributes = parse_attributes(cursor)?;
        Ok(Method {
            access_flags,
            name,
            descriptor,
            attributes,
        })
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

fn parse_attributes(cursor: &mut ByteCursor) -> Result<Vec<Attribute>, Error> {
    let count = cursor.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(Attribute::parse(cursor)?);
    }
    Ok(attributes)
}
