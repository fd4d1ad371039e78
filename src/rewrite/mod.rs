//! Class rewriting: substitute matching and the redirect-emitting pipeline stage.

mod modifier;
mod substitutes;

pub use modifier::FakeClassModifier;
pub use substitutes::{SubstituteCollection, SubstituteMethod, CLINIT_ALIAS, INIT_ALIAS};

use crate::classfile::reader::ClassReader;
use crate::classfile::writer::ClassWriter;
use crate::errors::Error;

/// Rewrite one real class against a substitute collection.
///
/// Every substitute must find its real method; the ones that match nothing are reported together
/// in a single error so a misspelled fake class can be fixed in one pass. `state_base` is the
/// state entry index the first substitute in the collection was registered under.
pub fn rewrite_class(
    bytes: &[u8],
    fakes: &mut SubstituteCollection,
    state_base: usize,
) -> Result<Vec<u8>, Error> {
    let reader = ClassReader::parse(bytes)?;
    let writer = ClassWriter::new(reader.class().constants.clone());
    let mut modifier = FakeClassModifier::new(writer, fakes, state_base);
    reader.accept(&mut modifier)?;
    let bytes = modifier.into_bytes()?;
    fakes.ensure_all_matched()?;
    Ok(bytes)
}
