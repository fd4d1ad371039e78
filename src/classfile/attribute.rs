use crate::classfile::binary::{ByteCursor, Serialize};
use crate::classfile::constants::{ClassConstantIndex, ConstantPool, Utf8ConstantIndex};
use crate::errors::FormatError;
use crate::flow::SerializableType;
use byteorder::WriteBytesExt;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// The representation is designed to be easily extended with custom attributes. Attributes the
/// rewriting passes don't understand are carried through as raw bytes.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Attribute, FormatError> {
        let name_index = Utf8ConstantIndex(crate::classfile::constants::ConstantIndex(
            cursor.u16()?,
        ));
        let length = cursor.u32()? as usize;
        let info = cursor.take(length)?.to_vec();
        Ok(Attribute { name_index, info })
    }

    /// Name of the attribute, resolved against the pool
    pub fn name<'p>(&self, constants: &'p ConstantPool) -> Result<&'p str, FormatError> {
        constants.utf8(self.name_index)
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally they represent
/// very different things. This trait is implemented by things which can be turned into attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: BytecodeArray,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        self.code_array.serialize(writer)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

impl Code {
    /// Parse the body of a `Code` attribute
    pub fn parse(cursor: &mut ByteCursor) -> Result<Code, FormatError> {
        let max_stack = cursor.u16()?;
        let max_locals = cursor.u16()?;
        let code_length = cursor.u32()? as usize;
        let code_array = BytecodeArray(cursor.take(code_length)?.to_vec());

        let handler_count = cursor.u16()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler::parse(cursor)?);
        }

        let attribute_count = cursor.u16()?;
        let mut attributes = Vec::with_capacity(attribute_count as usize);
        for _ in 0..attribute_count {
            attributes.push(Attribute::parse(cursor)?);
        }

        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: BytecodeIndex,

    /// End of exception handler range (exclusive)
    pub end_pc: BytecodeIndex,

    /// Start of the exception handler
    pub handler_pc: BytecodeIndex,

    /// Class of exceptions caught (`None` catches everything, eg. for `finally`)
    pub catch_type: Option<ClassConstantIndex>,
}

impl ExceptionHandler {
    pub fn parse(cursor: &mut ByteCursor) -> Result<ExceptionHandler, FormatError> {
        use crate::classfile::constants::ConstantIndex;
        let start_pc = BytecodeIndex(cursor.u16()?);
        let end_pc = BytecodeIndex(cursor.u16()?);
        let handler_pc = BytecodeIndex(cursor.u16()?);
        let catch_type = match cursor.u16()? {
            0 => None,
            index => Some(ClassConstantIndex(ConstantIndex(index))),
        };
        Ok(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        })
    }
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        match self.catch_type {
            None => 0u16.serialize(writer)?,
            Some(class) => class.serialize(writer)?,
        }
        Ok(())
    }
}

/// Encoded bytecode instructions
pub struct BytecodeArray(pub Vec<u8>);

impl Serialize for BytecodeArray {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let len = self.0.len() as u32;
        len.serialize(writer)?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

/// Index into `BytecodeArray`
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BytecodeIndex(pub u16);

impl Serialize for BytecodeIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Debug)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl StackMapTable {
    /// Parse a `StackMapTable` attribute body
    pub fn parse(cursor: &mut ByteCursor) -> Result<StackMapTable, FormatError> {
        let count = cursor.u16()?;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            frames.push(StackMapFrame::parse(cursor)?);
        }
        Ok(StackMapTable(frames))
    }
}

#[derive(Debug, Clone)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: u16 },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        stack: SerializableType,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<SerializableType>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<SerializableType>,
        stack: Vec<SerializableType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    pub fn set_offset_delta(&mut self, new_delta: u16) {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta = new_delta,
        }
    }

    pub fn parse(cursor: &mut ByteCursor) -> Result<StackMapFrame, FormatError> {
        let tag = cursor.u8()?;
        Ok(match tag {
            0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
            },
            64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: (tag - 64) as u16,
                stack: SerializableType::parse(cursor)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: cursor.u16()?,
                stack: SerializableType::parse(cursor)?,
            },
            248..=250 => StackMapFrame::ChopLocalsNoStack {
                offset_delta: cursor.u16()?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: cursor.u16()?,
            },
            252..=254 => {
                let offset_delta = cursor.u16()?;
                let added_k = (tag - 251) as usize;
                let mut locals = Vec::with_capacity(added_k);
                for _ in 0..added_k {
                    locals.push(SerializableType::parse(cursor)?);
                }
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = cursor.u16()?;
                let locals_count = cursor.u16()? as usize;
                let mut locals = Vec::with_capacity(locals_count);
                for _ in 0..locals_count {
                    locals.push(SerializableType::parse(cursor)?);
                }
                let stack_count = cursor.u16()? as usize;
                let mut stack = Vec::with_capacity(stack_count);
                for _ in 0..stack_count {
                    stack.push(SerializableType::parse(cursor)?);
                }
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            tag => return Err(FormatError::BadFrameTag { tag }),
        })
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                debug_assert!(
                    0 < *chopped_k && *chopped_k < 4,
                    "ChopLocalsNoStack chops 1-3 locals"
                );
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                let added_k = locals.len();
                debug_assert!(
                    0 < added_k && added_k < 4,
                    "AppendLocalsNoStack adds 1-3 locals"
                );
                (251 + added_k as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug)]
pub struct LineNumberTable(pub Vec<(BytecodeIndex, u16)>);

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

impl LineNumberTable {
    pub fn parse(cursor: &mut ByteCursor) -> Result<LineNumberTable, FormatError> {
        let count = cursor.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let start_pc = BytecodeIndex(cursor.u16()?);
            let line_number = cursor.u16()?;
            entries.push((start_pc, line_number));
        }
        Ok(LineNumberTable(entries))
    }
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.0.len() as u16).serialize(writer)?;
        for (start_pc, line_number) in &self.0 {
            start_pc.serialize(writer)?;
            line_number.serialize(writer)?;
        }
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.10
#[derive(Debug)]
pub struct SourceFile(pub Utf8ConstantIndex);

impl AttributeLike for SourceFile {
    const NAME: &'static str = "SourceFile";
}

impl Serialize for SourceFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.9
#[derive(Debug)]
pub struct Signature {
    pub signature: Utf8ConstantIndex,
}

impl AttributeLike for Signature {
    const NAME: &'static str = "Signature";
}

impl Serialize for Signature {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.signature.serialize(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stack_map_frames_round_trip() {
        let frames = vec![
            StackMapFrame::SameLocalsNoStack { offset_delta: 5 },
            StackMapFrame::SameLocalsNoStack { offset_delta: 100 },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 3,
                stack: SerializableType::Integer,
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 9,
                chopped_k: 2,
            },
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 80,
                locals: vec![SerializableType::Long, SerializableType::Top],
            },
            StackMapFrame::Full {
                offset_delta: 0,
                locals: vec![SerializableType::Integer],
                stack: vec![SerializableType::Null],
            },
        ];

        let mut bytes = vec![];
        StackMapTable(frames.clone()).serialize(&mut bytes).unwrap();

        let mut cursor = ByteCursor::new(&bytes);
        let reparsed = StackMapTable::parse(&mut cursor).unwrap();
        assert_eq!(cursor.remaining(), 0);

        let mut bytes2 = vec![];
        reparsed.serialize(&mut bytes2).unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn short_and_extended_same_frame_forms() {
        let mut short = vec![];
        StackMapFrame::SameLocalsNoStack { offset_delta: 63 }
            .serialize(&mut short)
            .unwrap();
        assert_eq!(short, vec![63]);

        let mut extended = vec![];
        StackMapFrame::SameLocalsNoStack { offset_delta: 64 }
            .serialize(&mut extended)
            .unwrap();
        assert_eq!(extended, vec![251, 0, 64]);
    }

    #[test]
    fn catch_all_handler_writes_zero_index() {
        let handler = ExceptionHandler {
            start_pc: BytecodeIndex(0),
            end_pc: BytecodeIndex(8),
            handler_pc: BytecodeIndex(8),
            catch_type: None,
        };
        let mut bytes = vec![];
        handler.serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 8, 0, 8, 0, 0]);

        let mut cursor = ByteCursor::new(&bytes);
        let reparsed = ExceptionHandler::parse(&mut cursor).unwrap();
        assert!(reparsed.catch_type.is_none());
    }
}
