//! Field and method descriptors, plus the erased view of generic signatures.

use crate::errors::DescriptorError;
use crate::util::Width;
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self, DescriptorError> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars).map_err(|_| DescriptorError(source.to_owned()))?;
        match chars.next() {
            None => Ok(ret),
            Some(_) => Err(DescriptorError(source.to_owned())),
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, ()>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, ()> {
        match source.next() {
            Some('B') => Ok(BaseType::Byte),
            Some('C') => Ok(BaseType::Char),
            Some('D') => Ok(BaseType::Double),
            Some('F') => Ok(BaseType::Float),
            Some('I') => Ok(BaseType::Int),
            Some('J') => Ok(BaseType::Long),
            Some('S') => Ok(BaseType::Short),
            Some('Z') => Ok(BaseType::Boolean),
            _ => Err(()),
        }
    }
}

/// Type of a field, parameter, or local variable
///
/// Class names are internal names (`java/lang/String`), not binary names.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn object(class_name: impl Into<String>) -> FieldType {
        FieldType::Object(class_name.into())
    }

    pub fn array(element: FieldType) -> FieldType {
        FieldType::Array(Box::new(element))
    }

    pub const OBJECT_CLASS: &'static str = "java/lang/Object";

    pub fn is_reference(&self) -> bool {
        !matches!(self, FieldType::Base(_))
    }
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            _ => 1,
        }
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Object(class_name) => {
                write_to.push('L');
                write_to.push_str(class_name);
                write_to.push(';');
            }
            FieldType::Array(element) => {
                write_to.push('[');
                element.render_to(write_to);
            }
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, ()> {
        match source.peek().copied() {
            Some('L') => {
                source.next();
                let mut class_name = String::new();
                loop {
                    match source.next() {
                        Some(';') => return Ok(FieldType::Object(class_name)),
                        Some(c) => class_name.push(c),
                        None => return Err(()),
                    }
                }
            }
            Some('[') => {
                source.next();
                Ok(FieldType::array(FieldType::parse_from(source)?))
            }
            Some(_) => BaseType::parse_from(source).map(FieldType::Base),
            None => Err(()),
        }
    }
}

/// Signature of a method
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Total slot length of parameters (not the same as the length of the vector),
    /// which must be 255 or less for the method to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let mut len = if has_this_param { 1 } else { 0 };
        for parameter in &self.parameters {
            len += parameter.width();
        }
        len
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, ()> {
        if source.next() != Some('(') {
            return Err(());
        }

        let mut parameters = vec![];
        while source.peek().copied() != Some(')') {
            parameters.push(FieldType::parse_from(source)?);
        }
        source.next();

        let return_type = if source.peek().copied() == Some('V') {
            source.next();
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

/// One parameter position in an erased generic signature
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ErasedParameter {
    /// Erases to a concrete type
    Exact(FieldType),

    /// A type variable: accepts any reference type at this position
    AnyReference,
}

/// Erased view of a generic method signature (a `Signature` attribute value).
///
/// Type arguments and bounds are discarded; each parameter keeps only the type
/// it erases to, or the fact that it was a type variable.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ErasedSignature {
    pub parameters: Vec<ErasedParameter>,
}

impl ErasedSignature {
    pub fn parse(source: &str) -> Result<ErasedSignature, DescriptorError> {
        let err = || DescriptorError(source.to_owned());
        let mut chars = source.chars().peekable();

        // Skip the type parameter section `<...>`, if any
        if chars.peek().copied() == Some('<') {
            let mut depth = 0usize;
            for c in chars.by_ref() {
                match c {
                    '<' => depth += 1,
                    '>' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if depth != 0 {
                return Err(err());
            }
        }

        if chars.next() != Some('(') {
            return Err(err());
        }

        let mut parameters = vec![];
        while chars.peek().copied() != Some(')') {
            parameters.push(Self::erase_one(&mut chars).ok_or_else(err)?);
        }

        Ok(ErasedSignature { parameters })
    }

    fn erase_one(chars: &mut Peekable<Chars>) -> Option<ErasedParameter> {
        match chars.peek().copied()? {
            'T' => {
                Self::skip_to_semicolon(chars)?;
                Some(ErasedParameter::AnyReference)
            }
            'L' => {
                let class_name = Self::class_signature_raw_name(chars)?;
                Some(ErasedParameter::Exact(FieldType::Object(class_name)))
            }
            '[' => {
                chars.next();
                match Self::erase_one(chars)? {
                    ErasedParameter::Exact(element) => {
                        Some(ErasedParameter::Exact(FieldType::array(element)))
                    }
                    // An array of a type variable erases to an object array
                    ErasedParameter::AnyReference => Some(ErasedParameter::Exact(
                        FieldType::array(FieldType::object(FieldType::OBJECT_CLASS)),
                    )),
                }
            }
            _ => {
                let base = BaseType::parse_from(chars).ok()?;
                Some(ErasedParameter::Exact(FieldType::Base(base)))
            }
        }
    }

    /// Consume `L pkg/Raw <args> . Inner <args> ;` and keep only the raw class name
    fn class_signature_raw_name(chars: &mut Peekable<Chars>) -> Option<String> {
        chars.next(); // 'L'
        let mut class_name = String::new();
        let mut depth = 0usize;
        loop {
            match chars.next()? {
                '<' => depth += 1,
                '>' => depth = depth.checked_sub(1)?,
                ';' if depth == 0 => return Some(class_name),
                // Inner-class projection: the erased class keeps the `$` form
                '.' if depth == 0 => class_name.push('$'),
                c if depth == 0 => class_name.push(c),
                _ => {}
            }
        }
    }

    fn skip_to_semicolon(chars: &mut Peekable<Chars>) -> Option<()> {
        for c in chars.by_ref() {
            if c == ';' {
                return Some(());
            }
        }
        None
    }

    /// Does a concrete parameter list fit this signature once erased?
    pub fn accepts(&self, parameters: &[FieldType]) -> bool {
        self.parameters.len() == parameters.len()
            && self
                .parameters
                .iter()
                .zip(parameters)
                .all(|(erased, concrete)| match erased {
                    ErasedParameter::Exact(typ) => typ == concrete,
                    ErasedParameter::AnyReference => concrete.is_reference(),
                })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fmt::Debug;

    fn round_trip<T: RenderDescriptor + ParseDescriptor + Debug + Eq>(rendered: &str, parsed: T) {
        assert_eq!(rendered, parsed.render());
        assert_eq!(T::parse(rendered).unwrap(), parsed);
    }

    const INT: FieldType = FieldType::Base(BaseType::Int);
    const DOUBLE: FieldType = FieldType::Base(BaseType::Double);

    #[test]
    fn field_types() {
        round_trip("I", INT);
        round_trip("Ljava/lang/Object;", FieldType::object("java/lang/Object"));
        round_trip(
            "[[D",
            FieldType::array(FieldType::array(DOUBLE)),
        );
        round_trip(
            "[Ljava/lang/String;",
            FieldType::array(FieldType::object("java/lang/String")),
        );
    }

    #[test]
    fn method_descriptors() {
        round_trip(
            "(IDLjava/lang/Integer;)Ljava/lang/Object;",
            MethodDescriptor {
                parameters: vec![INT, DOUBLE, FieldType::object("java/lang/Integer")],
                return_type: Some(FieldType::object("java/lang/Object")),
            },
        );
        round_trip(
            "()V",
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
    }

    #[test]
    fn parameter_slot_length() {
        let desc = MethodDescriptor::parse("(JDI)V").unwrap();
        assert_eq!(desc.parameter_length(false), 5);
        assert_eq!(desc.parameter_length(true), 6);
    }

    #[test]
    fn rejects_leftover_input() {
        assert!(MethodDescriptor::parse("()VV").is_err());
        assert!(FieldType::parse("Ljava/lang/String").is_err());
    }

    #[test]
    fn erased_signatures() {
        let sig = ErasedSignature::parse("<T:Ljava/lang/Object;>(TT;ILjava/util/List<TT;>;)TT;")
            .unwrap();
        assert_eq!(
            sig.parameters,
            vec![
                ErasedParameter::AnyReference,
                ErasedParameter::Exact(INT),
                ErasedParameter::Exact(FieldType::object("java/util/List")),
            ]
        );

        assert!(sig.accepts(&[
            FieldType::object("java/lang/String"),
            INT,
            FieldType::object("java/util/List"),
        ]));
        assert!(!sig.accepts(&[INT, INT, FieldType::object("java/util/List")]));
    }
}
