//! Substitute method descriptions and matching against real methods.
//!
//! A substitute method stands in for a real method of the class being modified. Matching is by
//! name and erased parameter descriptor, with two wrinkles: the reserved names `$init` and
//! `$clinit` stand for constructors and static initializers (whose real names cannot be written
//! down), and when the real method carries a generic signature, that signature decides the match
//! instead of the erased descriptor. The signature check lets a substitute be written against a
//! concrete instantiation (`String` where the real method declares a type variable) and rejects
//! substitutes that widen a generic bound.

use crate::descriptor::{
    ErasedSignature, FieldType, MethodDescriptor, ParseDescriptor, RenderDescriptor,
};
use crate::errors::Error;

/// Reserved substitute name standing in for `<init>`
pub const INIT_ALIAS: &str = "$init";

/// Reserved substitute name standing in for `<clinit>`
pub const CLINIT_ALIAS: &str = "$clinit";

/// One method of a substitute class, with its invocation constraints
#[derive(Clone, Debug)]
pub struct SubstituteMethod {
    /// Name as written in the substitute class (`$init`/`$clinit` aliases included)
    pub name: String,

    pub descriptor: MethodDescriptor,

    /// Exact invocation count required at the verification checkpoint
    pub expected: Option<usize>,

    /// Lower invocation bound checked at the verification checkpoint
    pub min_invocations: Option<usize>,

    /// Upper invocation bound checked at every call
    pub max_invocations: Option<usize>,
}

impl SubstituteMethod {
    pub fn new(name: impl Into<String>, descriptor: &str) -> Result<SubstituteMethod, Error> {
        Ok(SubstituteMethod {
            name: name.into(),
            descriptor: MethodDescriptor::parse(descriptor)?,
            expected: None,
            min_invocations: None,
            max_invocations: None,
        })
    }

    /// Name of the real method this substitute stands in for
    pub fn real_name(&self) -> &str {
        match self.name.as_str() {
            INIT_ALIAS => "<init>",
            CLINIT_ALIAS => "<clinit>",
            other => other,
        }
    }

    /// Rendered `name(descriptor)` form used in diagnostics
    pub fn display_name(&self) -> String {
        format!("{}{}", self.name, self.descriptor.render())
    }

    /// Effective lower invocation bound, if any constraint implies one
    pub fn minimum(&self) -> Option<usize> {
        self.expected.or(self.min_invocations)
    }

    /// Effective upper invocation bound, if any constraint implies one
    pub fn maximum(&self) -> Option<usize> {
        self.expected.or(self.max_invocations)
    }

    fn matches(
        &self,
        real_name: &str,
        real_parameters: &[FieldType],
        real_signature: Option<&ErasedSignature>,
    ) -> bool {
        if self.real_name() != real_name {
            return false;
        }
        match real_signature {
            None => self.descriptor.parameters == real_parameters,
            Some(signature) => signature.accepts(&self.descriptor.parameters),
        }
    }
}

/// The substitute methods of one substitute class, with match bookkeeping
pub struct SubstituteCollection {
    /// Internal name of the substitute class these methods belong to
    pub class_name: String,

    methods: Vec<SubstituteMethod>,
    matched: Vec<bool>,
}

impl SubstituteCollection {
    pub fn new(
        class_name: impl Into<String>,
        methods: Vec<SubstituteMethod>,
    ) -> SubstituteCollection {
        let matched = vec![false; methods.len()];
        SubstituteCollection {
            class_name: class_name.into(),
            methods,
            matched,
        }
    }

    pub fn methods(&self) -> &[SubstituteMethod] {
        &self.methods
    }

    pub fn method(&self, index: usize) -> &SubstituteMethod {
        &self.methods[index]
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Find the substitute standing in for a real method, if any
    pub fn find_match(
        &self,
        real_name: &str,
        real_descriptor: &str,
        real_signature: Option<&str>,
    ) -> Result<Option<usize>, Error> {
        let descriptor = MethodDescriptor::parse(real_descriptor)?;
        let signature = match real_signature {
            None => None,
            Some(signature) => Some(ErasedSignature::parse(signature)?),
        };
        Ok(self.methods.iter().position(|method| {
            method.matches(real_name, &descriptor.parameters, signature.as_ref())
        }))
    }

    /// Record that a substitute found its real method during a rewrite pass
    pub fn mark_matched(&mut self, index: usize) {
        self.matched[index] = true;
    }

    /// Fail with every substitute that matched nothing, all in one error
    pub fn ensure_all_matched(&self) -> Result<(), Error> {
        let unmatched: Vec<String> = self
            .methods
            .iter()
            .zip(&self.matched)
            .filter(|(_, matched)| !**matched)
            .map(|(method, _)| method.display_name())
            .collect();
        if unmatched.is_empty() {
            Ok(())
        } else {
            Err(Error::UnmatchedSubstitutes { unmatched })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn collection(methods: Vec<SubstituteMethod>) -> SubstituteCollection {
        SubstituteCollection::new("fakes/SampleFake", methods)
    }

    #[test]
    fn matches_by_name_and_parameters() {
        let fakes = collection(vec![
            SubstituteMethod::new("get", "(I)Ljava/lang/Object;").unwrap(),
            SubstituteMethod::new("get", "(Ljava/lang/String;)Ljava/lang/Object;").unwrap(),
        ]);

        assert_eq!(
            fakes.find_match("get", "(I)Ljava/lang/String;", None).unwrap(),
            Some(0),
        );
        assert_eq!(
            fakes
                .find_match("get", "(Ljava/lang/String;)V", None)
                .unwrap(),
            Some(1),
        );
        assert_eq!(fakes.find_match("get", "(J)V", None).unwrap(), None);
        assert_eq!(fakes.find_match("set", "(I)V", None).unwrap(), None);
    }

    #[test]
    fn init_aliases_map_to_constructor_names() {
        let fakes = collection(vec![
            SubstituteMethod::new("$init", "(I)V").unwrap(),
            SubstituteMethod::new("$clinit", "()V").unwrap(),
        ]);

        assert_eq!(fakes.find_match("<init>", "(I)V", None).unwrap(), Some(0));
        assert_eq!(fakes.find_match("<clinit>", "()V", None).unwrap(), Some(1));
        assert_eq!(fakes.find_match("$init", "(I)V", None).unwrap(), None);
    }

    #[test]
    fn generic_signature_decides_the_match() {
        // Substitute written against the String instantiation of a generic method
        let fakes = collection(vec![
            SubstituteMethod::new("put", "(Ljava/lang/String;)V").unwrap(),
        ]);

        // Without the signature the erased descriptors disagree
        assert_eq!(
            fakes
                .find_match("put", "(Ljava/lang/Object;)V", None)
                .unwrap(),
            None,
        );
        // The type variable accepts any reference type
        assert_eq!(
            fakes
                .find_match(
                    "put",
                    "(Ljava/lang/Object;)V",
                    Some("<T:Ljava/lang/Object;>(TT;)V"),
                )
                .unwrap(),
            Some(0),
        );
    }

    #[test]
    fn generic_signature_rejects_a_widened_bound() {
        let fakes = collection(vec![
            SubstituteMethod::new("put", "(Ljava/lang/Object;)V").unwrap(),
        ]);

        assert_eq!(
            fakes
                .find_match(
                    "put",
                    "(Ljava/lang/Object;)V",
                    Some("(Ljava/lang/Number;)V"),
                )
                .unwrap(),
            None,
        );
    }

    #[test]
    fn unmatched_substitutes_are_reported_together() {
        let mut fakes = collection(vec![
            SubstituteMethod::new("first", "()V").unwrap(),
            SubstituteMethod::new("second", "(I)I").unwrap(),
            SubstituteMethod::new("third", "()V").unwrap(),
        ]);
        fakes.mark_matched(1);

        match fakes.ensure_all_matched() {
            Err(Error::UnmatchedSubstitutes { unmatched }) => {
                assert_eq!(unmatched, vec!["first()V", "third()V"]);
            }
            other => panic!("expected unmatched substitutes, got {:?}", other.err()),
        }
    }

    #[test]
    fn constraint_bounds_fall_back_to_the_exact_count() {
        let mut method = SubstituteMethod::new("foo", "()V").unwrap();
        method.expected = Some(2);
        assert_eq!(method.minimum(), Some(2));
        assert_eq!(method.maximum(), Some(2));

        let mut method = SubstituteMethod::new("foo", "()V").unwrap();
        method.min_invocations = Some(1);
        assert_eq!(method.minimum(), Some(1));
        assert_eq!(method.maximum(), None);
    }
}
