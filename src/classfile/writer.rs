//! Classfile assembly from a stream of [`ClassEvent`]s.
//!
//! [`ClassWriter`] is the terminal [`ClassStage`]: it accumulates events back into a
//! [`ClassFile`] model and serializes it. It is meant to run against a constant pool cloned from
//! the [`ClassReader`](crate::classfile::reader::ClassReader) that produces the events: the
//! writer only ever appends to the pool, so every index baked into raw-copied attributes stays
//! valid and an unmodified class round-trips byte for byte.
//!
//! Decoded method bodies are replayed into a [`CodeBuilder`], which recomputes stack limits,
//! frames, and jump encodings for whatever the upstream stages emitted.

use crate::classfile::attribute::{Attribute, BytecodeIndex, LineNumberTable};
use crate::classfile::constants::{ClassConstantIndex, ConstantPool};
use crate::classfile::reader::{ClassEvent, ClassStage, CodeDisposition, CodeEvent};
use crate::classfile::{
    ClassAccessFlags, ClassFile, Field, Method, MethodAccessFlags, Version,
};
use crate::descriptor::{MethodDescriptor, ParseDescriptor};
use crate::errors::Error;
use crate::flow::{CodeBuilder, Frame, FrameMode, Label, VerificationType};
use std::collections::HashMap;

/// Assembles a classfile from events
pub struct ClassWriter {
    constants: ConstantPool,
    version: Version,
    access_flags: ClassAccessFlags,
    this_class: Option<ClassConstantIndex>,
    this_class_name: String,
    super_class: Option<ClassConstantIndex>,
    interfaces: Vec<ClassConstantIndex>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    attributes: Vec<Attribute>,
    current_method: Option<MethodInProgress>,
}

struct MethodInProgress {
    access_flags: MethodAccessFlags,
    name: String,
    descriptor: String,
    attributes: Vec<Attribute>,
    body: Option<BodyInProgress>,
}

struct BodyInProgress {
    builder: CodeBuilder,

    /// Original `Code` attribute, used verbatim if the rebuilt body overflows the size limit
    raw: Attribute,

    line_numbers: Vec<(Label, u16)>,
}

impl ClassWriter {
    /// Start a writer over a constant pool, usually one cloned from the reader feeding it
    pub fn new(constants: ConstantPool) -> ClassWriter {
        ClassWriter {
            constants,
            version: Version::JAVA8,
            access_flags: ClassAccessFlags::empty(),
            this_class: None,
            this_class_name: String::new(),
            super_class: None,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
            current_method: None,
        }
    }

    pub fn constants(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Serialize the accumulated class
    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        let this_class = self.this_class.ok_or(Error::MissingClassHeader)?;
        let class = ClassFile {
            version: self.version,
            constants: self.constants,
            access_flags: self.access_flags,
            this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        };
        class.into_bytes()
    }

    fn frame_mode(&self) -> FrameMode {
        if self.version >= Version::JAVA6 {
            FrameMode::FullFrames
        } else {
            FrameMode::StackSizeOnly
        }
    }

    /// Frame implied by the method descriptor at the first instruction
    fn method_entry_frame(
        &self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<Frame, Error> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let this_type = if access_flags.contains(MethodAccessFlags::STATIC) {
            None
        } else if name == "<init>" {
            Some(VerificationType::UninitializedThis)
        } else {
            Some(VerificationType::Object(self.this_class_name.clone()))
        };
        Ok(Frame::entry_frame(this_type, &descriptor.parameters))
    }

    fn receive_code_event(&mut self, event: CodeEvent) -> Result<(), Error> {
        match event {
            CodeEvent::Start { raw, .. } => {
                let (access_flags, name, descriptor) = {
                    let method = self
                        .current_method
                        .as_ref()
                        .ok_or(Error::MissingClassHeader)?;
                    (
                        method.access_flags,
                        method.name.clone(),
                        method.descriptor.clone(),
                    )
                };
                let entry_frame = self.method_entry_frame(access_flags, &name, &descriptor)?;
                let builder =
                    CodeBuilder::new(self.frame_mode(), self.this_class_name.clone(), entry_frame);
                if let Some(method) = self.current_method.as_mut() {
                    method.body = Some(BodyInProgress {
                        builder,
                        raw: raw.clone(),
                        line_numbers: vec![],
                    });
                }
            }
            CodeEvent::Label(label) => {
                if let Some(body) = self.current_body() {
                    body.builder.place_label(label)?;
                }
            }
            CodeEvent::Instruction(insn) => {
                if let Some(body) = self.current_body() {
                    body.builder.push(insn);
                }
            }
            CodeEvent::Branch(branch) => {
                if let Some(body) = self.current_body() {
                    body.builder.end_block(branch)?;
                }
            }
            CodeEvent::Handler {
                start,
                end,
                handler,
                catch_type,
            } => {
                let catch_type = catch_type.map(str::to_owned);
                if let Some(body) = self.current_body() {
                    body.builder.add_handler(start, end, handler, catch_type);
                }
            }
            CodeEvent::LineNumber(label, line) => {
                if let Some(body) = self.current_body() {
                    body.line_numbers.push((label, line));
                }
            }
            CodeEvent::End => {
                let mut method = match self.current_method.take() {
                    Some(method) => method,
                    None => return Err(Error::MissingClassHeader),
                };
                if let Some(body) = method.body.take() {
                    let attribute = self.finish_body(&method, body)?;
                    method.attributes.push(attribute);
                }
                self.current_method = Some(method);
            }
        }
        Ok(())
    }

    fn current_body(&mut self) -> Option<&mut BodyInProgress> {
        self.current_method.as_mut().and_then(|m| m.body.as_mut())
    }

    /// Fresh label from the open method body, for stages that splice in their own control flow
    pub fn fresh_code_label(&mut self) -> Result<Label, Error> {
        match self.current_body() {
            Some(body) => Ok(body.builder.fresh_label()),
            None => Err(Error::MissingClassHeader),
        }
    }

    fn finish_body(
        &mut self,
        method: &MethodInProgress,
        body: BodyInProgress,
    ) -> Result<Attribute, Error> {
        let BodyInProgress {
            builder,
            raw,
            line_numbers,
        } = body;

        let finished = builder.finish(&mut self.constants, &method.name, &method.descriptor);
        let (mut code, label_offsets) = match finished {
            Ok(finished) => finished,
            Err(Error::MethodCodeTooLarge { name, descriptor }) => {
                log::warn!(
                    "method `{}{}` exceeds the code size limit, keeping its original body",
                    name,
                    descriptor,
                );
                return Ok(raw);
            }
            Err(err) => return Err(err),
        };

        let line_table = rebuild_line_numbers(&line_numbers, &label_offsets);
        if !line_table.0.is_empty() {
            code.attributes
                .push(self.constants.get_attribute(line_table)?);
        }

        self.constants.get_attribute(code)
    }
}

impl ClassStage for ClassWriter {
    /// A bare writer copies every method body through untouched; stages layered on top pick
    /// `Decoded` for the methods they intend to rewrite
    fn code_disposition(&self, _: &str, _: &str, _: MethodAccessFlags) -> CodeDisposition {
        CodeDisposition::Raw
    }

    fn receive(&mut self, event: ClassEvent) -> Result<(), Error> {
        match event {
            ClassEvent::Start {
                version,
                access_flags,
                this_class,
                super_class,
                interfaces,
            } => {
                // Older inputs are upgraded so rebuilt methods may carry a StackMapTable
                self.version = version.max(Version::JAVA5);
                self.access_flags = access_flags;
                self.this_class_name = this_class.to_owned();
                self.this_class = Some(self.constants.get_class(this_class)?);
                self.super_class = match super_class {
                    None => None,
                    Some(name) => Some(self.constants.get_class(name)?),
                };
                self.interfaces = interfaces
                    .into_iter()
                    .map(|name| self.constants.get_class(name))
                    .collect::<Result<_, _>>()?;
            }
            ClassEvent::Field {
                access_flags,
                name,
                descriptor,
                attributes,
            } => {
                let name = self.constants.get_utf8(name)?;
                let descriptor = self.constants.get_utf8(descriptor)?;
                self.fields.push(Field {
                    access_flags,
                    name,
                    descriptor,
                    attributes: attributes.to_vec(),
                });
            }
            ClassEvent::MethodStart {
                access_flags,
                name,
                descriptor,
                signature: _,
            } => {
                self.current_method = Some(MethodInProgress {
                    access_flags,
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                    attributes: vec![],
                    body: None,
                });
            }
            ClassEvent::Code(code_event) => self.receive_code_event(code_event)?,
            ClassEvent::MethodAttribute(attribute) => {
                if let Some(method) = self.current_method.as_mut() {
                    method.attributes.push(attribute.clone());
                }
            }
            ClassEvent::MethodEnd => {
                let method = match self.current_method.take() {
                    Some(method) => method,
                    None => return Err(Error::MissingClassHeader),
                };
                let name = self.constants.get_utf8(&method.name)?;
                let descriptor = self.constants.get_utf8(&method.descriptor)?;
                self.methods.push(Method {
                    access_flags: method.access_flags,
                    name,
                    descriptor,
                    attributes: method.attributes,
                });
            }
            ClassEvent::ClassAttribute(attribute) => {
                self.attributes.push(attribute.clone());
            }
            ClassEvent::End => (),
        }
        Ok(())
    }
}

fn rebuild_line_numbers(
    line_numbers: &[(Label, u16)],
    label_offsets: &HashMap<Label, u16>,
) -> LineNumberTable {
    let mut entries: Vec<(BytecodeIndex, u16)> = line_numbers
        .iter()
        .filter_map(|(label, line)| {
            label_offsets
                .get(label)
                .map(|offset| (BytecodeIndex(*offset), *line))
        })
        .collect();
    entries.sort_by_key(|(offset, _)| offset.0);
    LineNumberTable(entries)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classfile::attribute::{AttributeLike, BytecodeArray, Code, StackMapTable};
    use crate::classfile::reader::ClassReader;
    use crate::classfile::binary::ByteCursor;

    fn sample_class(code_bytes: Vec<u8>) -> Vec<u8> {
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class("sample/Branches").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let method_name = constants.get_utf8("max").unwrap();
        let method_descriptor = constants.get_utf8("(II)I").unwrap();

        let code = Code {
            max_stack: 2,
            max_locals: 2,
            code_array: BytecodeArray(code_bytes),
            exception_table: vec![],
            attributes: vec![],
        };
        let code_attribute = constants.get_attribute(code).unwrap();

        let class = ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![crate::classfile::Method {
                access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                name: method_name,
                descriptor: method_descriptor,
                attributes: vec![code_attribute],
            }],
            attributes: vec![],
        };
        class.into_bytes().unwrap()
    }

    /// Forwards everything to the writer but decodes every method body
    struct DecodeAll<'w>(&'w mut ClassWriter);

    impl<'w> ClassStage for DecodeAll<'w> {
        fn code_disposition(&self, _: &str, _: &str, _: MethodAccessFlags) -> CodeDisposition {
            CodeDisposition::Decoded
        }

        fn receive(&mut self, event: ClassEvent) -> Result<(), Error> {
            self.0.receive(event)
        }
    }

    #[test]
    fn raw_round_trip_is_byte_exact() {
        let original = sample_class(vec![0x1a, 0x1b, 0xa2, 0x00, 0x05, 0x1a, 0xac, 0x1b, 0xac]);
        let reader = ClassReader::parse(&original).unwrap();
        let mut writer = ClassWriter::new(reader.class().constants.clone());
        reader.accept(&mut writer).unwrap();
        assert_eq!(writer.into_bytes().unwrap(), original);
    }

    #[test]
    fn decoded_replay_rebuilds_the_same_bytecode_with_frames() {
        let code_bytes = vec![0x1a, 0x1b, 0xa2, 0x00, 0x05, 0x1a, 0xac, 0x1b, 0xac];
        let original = sample_class(code_bytes.clone());
        let reader = ClassReader::parse(&original).unwrap();
        let mut writer = ClassWriter::new(reader.class().constants.clone());
        reader.accept(&mut DecodeAll(&mut writer)).unwrap();

        let rebuilt = writer.into_bytes().unwrap();
        let rebuilt = ClassFile::parse(&rebuilt).unwrap();
        let method = &rebuilt.methods[0];
        let code_attribute = method
            .attributes
            .iter()
            .find(|attribute| attribute.name(&rebuilt.constants).unwrap() == Code::NAME)
            .unwrap();
        let code = Code::parse(&mut ByteCursor::new(&code_attribute.info)).unwrap();

        assert_eq!(code.code_array.0, code_bytes);
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.max_locals, 2);
        assert!(code
            .attributes
            .iter()
            .any(|attribute| attribute.name(&rebuilt.constants).unwrap() == StackMapTable::NAME));
    }
}
