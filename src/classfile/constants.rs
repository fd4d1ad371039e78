use crate::classfile::attribute::{Attribute, AttributeLike};
use crate::classfile::binary::{ByteCursor, Serialize};
use crate::errors::{Error, FormatError};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::result::Result;

/// Class file constant pool
///
/// The pool is append only: constants are interned as they are requested, so identical content
/// always resolves to the same index. Parsing an existing classfile pre-populates the interning
/// maps, which means constants already present in the class get reused (and re-serializing an
/// unmodified class reproduces the pool byte for byte).
#[derive(Clone)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<[u8; 4], ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<[u8; 8], ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    method_handles: HashMap<(HandleKind, ConstantIndex), ConstantIndex>,
    method_types: HashMap<Utf8ConstantIndex, ConstantIndex>,
    invoke_dynamics: HashMap<(u16, NameAndTypeConstantIndex), InvokeDynamicConstantIndex>,
}

impl ConstantPool {
    /// Make a fresh empty constant pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
            method_handles: HashMap::new(),
            method_types: HashMap::new(),
            invoke_dynamics: HashMap::new(),
        }
    }

    /// Parse a constant pool, including its leading count
    pub fn parse(cursor: &mut ByteCursor) -> Result<ConstantPool, FormatError> {
        let count = cursor.u16()?;
        let mut pool = ConstantPool::new();

        while (pool.constants.offset_len().0 as u16) < count {
            let index = pool.constants.offset_len().0 as u16;
            let constant = Constant::parse(cursor, index)?;
            pool.intern_parsed(index, &constant);
            pool.constants.push(constant);
        }

        Ok(pool)
    }

    /// Record a freshly parsed constant in the interning maps, so that later writes reuse it
    fn intern_parsed(&mut self, index: u16, constant: &Constant) {
        let idx = ConstantIndex(index);
        match constant {
            Constant::Utf8(string) => {
                self.utf8s
                    .entry(string.clone())
                    .or_insert(Utf8ConstantIndex(idx));
            }
            Constant::Integer(integer) => {
                self.integers.entry(*integer).or_insert(idx);
            }
            Constant::Float(float) => {
                self.floats.entry(float.to_be_bytes()).or_insert(idx);
            }
            Constant::Long(long) => {
                self.longs.entry(*long).or_insert(idx);
            }
            Constant::Double(double) => {
                self.doubles.entry(double.to_be_bytes()).or_insert(idx);
            }
            Constant::Class(name) => {
                self.classes.entry(*name).or_insert(ClassConstantIndex(idx));
            }
            Constant::String(utf8) => {
                self.strings
                    .entry(*utf8)
                    .or_insert(StringConstantIndex(idx));
            }
            Constant::FieldRef(class, name_and_type) => {
                self.fieldrefs
                    .entry((*class, *name_and_type))
                    .or_insert(FieldRefConstantIndex(idx));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.methodrefs
                    .entry((*class, *name_and_type, *is_interface))
                    .or_insert(MethodRefConstantIndex(idx));
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((*name, *descriptor))
                    .or_insert(NameAndTypeConstantIndex(idx));
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                self.method_handles
                    .entry((*handle_kind, *member))
                    .or_insert(idx);
            }
            Constant::MethodType { descriptor } => {
                self.method_types.entry(*descriptor).or_insert(idx);
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                self.invoke_dynamics
                    .entry((*bootstrap_method, *method_descriptor))
                    .or_insert(InvokeDynamicConstantIndex(idx));
            }
            // Not interned: never produced by the rewriting passes
            Constant::Dynamic { .. } | Constant::Module(_) | Constant::Package(_) => {}
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let offset: u16 = self.constants.offset_len().0 as u16;

        if offset.checked_add(constant.width() as u16).is_none() {
            return Err(Error::ConstantPoolOverflow {
                constant: format!("{:?}", constant),
                index: offset as usize,
            });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset))
    }

    /// Get or insert a utf8 constant
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, Error> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant by internal name
    pub fn get_class(&mut self, class_name: &str) -> Result<ClassConstantIndex, Error> {
        let name = self.get_utf8(class_name)?;
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name))?);
            self.classes.insert(name, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant
    pub fn get_string(&mut self, value: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.get_utf8(value)?;
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            let idx = StringConstantIndex(self.push_constant(Constant::String(utf8))?);
            self.strings.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        let key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a field reference
    pub fn get_field_ref(
        &mut self,
        class_name: &str,
        field_name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class = self.get_class(class_name)?;
        let name_and_type = self.get_name_and_type(field_name, descriptor)?;
        let key = (class, name_and_type);
        if let Some(idx) = self.fieldrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class, name_and_type);
            let idx = FieldRefConstantIndex(self.push_constant(constant)?);
            self.fieldrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a method reference
    pub fn get_method_ref(
        &mut self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class = self.get_class(class_name)?;
        let name_and_type = self.get_name_and_type(method_name, descriptor)?;
        let key = (class, name_and_type, is_interface);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert an `int` constant
    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.integers.get(&integer) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Integer(integer))?;
            self.integers.insert(integer, idx);
            Ok(idx)
        }
    }

    /// Get or insert a `long` constant
    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.longs.get(&long) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Long(long))?;
            self.longs.insert(long, idx);
            Ok(idx)
        }
    }

    /// Get or insert a `float` constant
    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, Error> {
        let key = float.to_be_bytes();
        if let Some(idx) = self.floats.get(&key) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Float(float))?;
            self.floats.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a `double` constant
    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, Error> {
        let key = double.to_be_bytes();
        if let Some(idx) = self.doubles.get(&key) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Double(double))?;
            self.doubles.insert(key, idx);
            Ok(idx)
        }
    }

    /// Serialize an attribute body, interning its name
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info)?;

        Ok(Attribute { name_index, info })
    }

    /// Look up any constant by index
    pub fn entry(&self, index: ConstantIndex) -> Result<&Constant, FormatError> {
        self.constants
            .get_offset(Offset(index.0 as usize))
            .ok()
            .ok_or(FormatError::BadConstantIndex { index: index.0 })
    }

    /// Resolve a utf8 constant
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, FormatError> {
        match self.entry(index.0)? {
            Constant::Utf8(string) => Ok(string),
            other => Err(FormatError::BadConstantType {
                index: index.0 .0,
                expected: "Utf8",
                found: other.type_name(),
            }),
        }
    }

    /// Resolve a class constant to its internal name
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<&str, FormatError> {
        match self.entry(index.0)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(FormatError::BadConstantType {
                index: index.0 .0,
                expected: "Class",
                found: other.type_name(),
            }),
        }
    }

    /// Resolve a name & type constant to its (name, descriptor) strings
    pub fn name_and_type(
        &self,
        index: NameAndTypeConstantIndex,
    ) -> Result<(&str, &str), FormatError> {
        match self.entry(index.0)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(FormatError::BadConstantType {
                index: index.0 .0,
                expected: "NameAndType",
                found: other.type_name(),
            }),
        }
    }

    /// Resolve a field reference to its (class, name, descriptor) strings
    pub fn field_ref(
        &self,
        index: FieldRefConstantIndex,
    ) -> Result<(&str, &str, &str), FormatError> {
        match self.entry(index.0)? {
            Constant::FieldRef(class, name_and_type) => {
                let class_name = self.class_name(*class)?;
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((class_name, name, descriptor))
            }
            other => Err(FormatError::BadConstantType {
                index: index.0 .0,
                expected: "FieldRef",
                found: other.type_name(),
            }),
        }
    }

    /// Resolve a method reference to its (class, name, descriptor) strings
    pub fn method_ref(
        &self,
        index: MethodRefConstantIndex,
    ) -> Result<(&str, &str, &str), FormatError> {
        match self.entry(index.0)? {
            Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                let class_name = self.class_name(*class)?;
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((class_name, name, descriptor))
            }
            other => Err(FormatError::BadConstantType {
                index: index.0 .0,
                expected: "MethodRef",
                found: other.type_name(),
            }),
        }
    }

    /// Resolve an invokedynamic call site to its (name, descriptor) strings
    pub fn invoke_dynamic_descriptor(
        &self,
        index: InvokeDynamicConstantIndex,
    ) -> Result<(&str, &str), FormatError> {
        match self.entry(index.0)? {
            Constant::InvokeDynamic {
                method_descriptor, ..
            } => self.name_and_type(*method_descriptor),
            other => Err(FormatError::BadConstantType {
                index: index.0 .0,
                expected: "InvokeDynamic",
                found: other.type_name(),
            }),
        }
    }

    /// Index the next constant would be placed at (also the serialized pool count)
    pub fn next_index(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }
}

impl Default for ConstantPool {
    fn default() -> ConstantPool {
        ConstantPool::new()
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.next_index().serialize(writer)?;
        for (_, _, constant) in self.constants.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the null character
    /// `\u{0000}` and the encoding of supplementary characters is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only valid in `module-info` classes)
    Module(Utf8ConstantIndex),

    /// Package (only valid in `module-info` classes)
    Package(Utf8ConstantIndex),
}

impl Constant {
    fn type_name(&self) -> &'static str {
        match self {
            Constant::Class(_) => "Class",
            Constant::FieldRef(_, _) => "FieldRef",
            Constant::MethodRef { .. } => "MethodRef",
            Constant::String(_) => "String",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::Utf8(_) => "Utf8",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module(_) => "Module",
            Constant::Package(_) => "Package",
        }
    }

    /// Parse a single constant (the `index` is only used for error reporting)
    pub fn parse(cursor: &mut ByteCursor, index: u16) -> Result<Constant, FormatError> {
        let constant = match cursor.u8()? {
            1 => {
                let length = cursor.u16()? as usize;
                let bytes = cursor.take(length)?;
                let string = cesu8::from_java_cesu8(bytes)
                    .map_err(|_| FormatError::BadUtf8 { index })?;
                Constant::Utf8(string.into_owned())
            }
            3 => Constant::Integer(cursor.i32()?),
            4 => Constant::Float(cursor.f32()?),
            5 => Constant::Long(cursor.i64()?),
            6 => Constant::Double(cursor.f64()?),
            7 => Constant::Class(Utf8ConstantIndex(ConstantIndex(cursor.u16()?))),
            8 => Constant::String(Utf8ConstantIndex(ConstantIndex(cursor.u16()?))),
            9 => Constant::FieldRef(
                ClassConstantIndex(ConstantIndex(cursor.u16()?)),
                NameAndTypeConstantIndex(ConstantIndex(cursor.u16()?)),
            ),
            tag @ (10 | 11) => Constant::MethodRef {
                class: ClassConstantIndex(ConstantIndex(cursor.u16()?)),
                name_and_type: NameAndTypeConstantIndex(ConstantIndex(cursor.u16()?)),
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex(ConstantIndex(cursor.u16()?)),
                descriptor: Utf8ConstantIndex(ConstantIndex(cursor.u16()?)),
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::parse(cursor.u8()?)?,
                member: ConstantIndex(cursor.u16()?),
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex(ConstantIndex(cursor.u16()?)),
            },
            17 => Constant::Dynamic {
                bootstrap_method: cursor.u16()?,
                name_and_type: NameAndTypeConstantIndex(ConstantIndex(cursor.u16()?)),
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: cursor.u16()?,
                method_descriptor: NameAndTypeConstantIndex(ConstantIndex(cursor.u16()?)),
            },
            19 => Constant::Module(Utf8ConstantIndex(ConstantIndex(cursor.u16()?))),
            20 => Constant::Package(Utf8ConstantIndex(ConstantIndex(cursor.u16()?))),
            tag => return Err(FormatError::BadConstantTag { tag, index }),
        };
        Ok(constant)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer = cesu8::to_java_cesu8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(utf8) => {
                8u8.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Index into the constant pool (1-based)
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct MethodRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct InvokeDynamicConstantIndex(pub ConstantIndex);

impl From<Utf8ConstantIndex> for ConstantIndex {
    fn from(index: Utf8ConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<StringConstantIndex> for ConstantIndex {
    fn from(index: StringConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<NameAndTypeConstantIndex> for ConstantIndex {
    fn from(index: NameAndTypeConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<ClassConstantIndex> for ConstantIndex {
    fn from(index: ClassConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<FieldRefConstantIndex> for ConstantIndex {
    fn from(index: FieldRefConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<MethodRefConstantIndex> for ConstantIndex {
    fn from(index: MethodRefConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl From<InvokeDynamicConstantIndex> for ConstantIndex {
    fn from(index: InvokeDynamicConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for Utf8ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for StringConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for NameAndTypeConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for ClassConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for FieldRefConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for MethodRefConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for InvokeDynamicConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// Kind of method handle
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    fn parse(tag: u8) -> Result<HandleKind, FormatError> {
        Ok(match tag {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            kind => return Err(FormatError::BadHandleKind { kind }),
        })
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let tag: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        tag.serialize(writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_reuses_indices() {
        let mut pool = ConstantPool::new();
        let a = pool.get_utf8("java/lang/Object").unwrap();
        let b = pool.get_utf8("java/lang/Object").unwrap();
        assert_eq!(a, b);

        let c1 = pool.get_class("java/lang/Object").unwrap();
        let c2 = pool.get_class("java/lang/Object").unwrap();
        assert_eq!(c1, c2);
        assert_eq!(pool.next_index(), 3);
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        pool.get_long(42).unwrap();
        let next = pool.get_integer(0).unwrap();
        assert_eq!(next, ConstantIndex(3));
    }

    #[test]
    fn parsed_pool_reserializes_identically() {
        let mut pool = ConstantPool::new();
        pool.get_class("com/example/Widget").unwrap();
        pool.get_method_ref("com/example/Widget", "render", "()V", false)
            .unwrap();
        pool.get_string("hello \u{0} world").unwrap();
        pool.get_double(6.25).unwrap();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();

        let mut cursor = ByteCursor::new(&bytes);
        let reparsed = ConstantPool::parse(&mut cursor).unwrap();
        assert_eq!(cursor.remaining(), 0);

        let mut bytes2 = vec![];
        reparsed.serialize(&mut bytes2).unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn parsed_constants_are_interned() {
        let mut pool = ConstantPool::new();
        pool.get_utf8("alpha").unwrap();
        pool.get_class("beta").unwrap();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();

        let mut cursor = ByteCursor::new(&bytes);
        let mut reparsed = ConstantPool::parse(&mut cursor).unwrap();
        let before = reparsed.next_index();
        reparsed.get_utf8("alpha").unwrap();
        reparsed.get_class("beta").unwrap();
        assert_eq!(reparsed.next_index(), before);
    }
}
