//! Live code replacement and per-class definition tracking.
//!
//! The engine hands rewritten bytecode to the runtime's replacement facility and remembers every
//! generation it installed, so any class can be walked back one step at a time or snapped back
//! to the classpath original. The facility itself is behind [`CodeReplacement`]: batches either
//! apply atomically or fail as a whole.

use crate::classpath::{ClassBytesProvider, ClassBytesSource, ClassId};
use crate::errors::{Error, RedefinitionError};
use std::collections::HashMap;
use std::sync::Arc;

/// Marker a [`CodeReplacement`] implementation puts in a rejection reason when the root cause is
/// a class the runtime has not loaded, followed by that class's internal name
pub const UNLOADED_CLASS_REASON: &str = "class not loaded: ";

/// One class in a replacement batch
pub struct RedefinitionRequest<'a> {
    pub class: &'a ClassId,
    pub bytecode: &'a [u8],
}

/// The runtime's live code replacement facility
pub trait CodeReplacement {
    /// Replace the method bodies of every class in the batch, atomically
    fn redefine(&mut self, batch: &[RedefinitionRequest]) -> Result<(), RedefinitionError>;
}

/// Definition history of one redefined class
struct RedefinitionRecord {
    /// Installed bytecode, oldest first; the last entry is live
    generations: Vec<Arc<Vec<u8>>>,

    /// Substitute class that caused the latest rewrite, when there is one
    substitute_class: Option<String>,
}

/// Tracks which definition of every class is live and how to get back
pub struct RedefinitionEngine<R, P> {
    runtime: R,
    classpath: ClassBytesSource<P>,
    records: HashMap<ClassId, RedefinitionRecord>,
}

impl<R: CodeReplacement, P: ClassBytesProvider> RedefinitionEngine<R, P> {
    pub fn new(runtime: R, classpath: ClassBytesSource<P>) -> RedefinitionEngine<R, P> {
        RedefinitionEngine {
            runtime,
            classpath,
            records: HashMap::new(),
        }
    }

    pub fn classpath(&self) -> &ClassBytesSource<P> {
        &self.classpath
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Number of modified generations currently stacked on a class (0 means original)
    pub fn generation(&self, class: &ClassId) -> usize {
        self.records
            .get(class)
            .map(|record| record.generations.len())
            .unwrap_or(0)
    }

    /// Substitute class behind the live definition, if the class is redefined
    pub fn originating_substitute(&self, class: &ClassId) -> Option<&str> {
        self.records
            .get(class)?
            .substitute_class
            .as_deref()
    }

    /// Classes whose live definition originates from the given substitute class
    pub fn classes_redefined_by(&self, substitute_class: &str) -> Vec<&ClassId> {
        self.records
            .iter()
            .filter(|(_, record)| record.substitute_class.as_deref() == Some(substitute_class))
            .map(|(class, _)| class)
            .collect()
    }

    /// Install new bytecode for one class, stacking on whatever is live
    pub fn redefine_class(
        &mut self,
        class: ClassId,
        bytecode: Vec<u8>,
        substitute_class: Option<String>,
    ) -> Result<(), Error> {
        self.redefine_classes(vec![(class, bytecode, substitute_class)])
    }

    /// Install new bytecode for a batch of classes, atomically
    pub fn redefine_classes(
        &mut self,
        batch: Vec<(ClassId, Vec<u8>, Option<String>)>,
    ) -> Result<(), Error> {
        let requests: Vec<RedefinitionRequest> = batch
            .iter()
            .map(|(class, bytecode, _)| RedefinitionRequest {
                class,
                bytecode,
            })
            .collect();
        self.runtime.redefine(&requests).map_err(diagnose)?;

        for (class, bytecode, substitute_class) in batch {
            log::debug!(
                "installed generation {} of {:?}",
                self.generation(&class) + 1,
                class,
            );
            let record = self
                .records
                .entry(class)
                .or_insert_with(|| RedefinitionRecord {
                    generations: vec![],
                    substitute_class: None,
                });
            record.generations.push(Arc::new(bytecode));
            record.substitute_class = substitute_class;
        }
        Ok(())
    }

    /// One-step undo: reinstate the previous generation, or the original when only one is live.
    ///
    /// The record is only touched once the runtime accepts the restore, so a rejected restore
    /// leaves the generation stack describing what is actually live.
    pub fn restore_last(&mut self, class: &ClassId) -> Result<(), Error> {
        let record = self
            .records
            .get(class)
            .ok_or_else(|| RedefinitionError::NothingToRestore {
                class_name: class.name.clone(),
            })?;
        let depth = record.generations.len();
        if depth < 2 {
            self.install_original(class)?;
            self.records.remove(class);
            return Ok(());
        }
        let previous = record.generations[depth - 2].clone();
        let request = RedefinitionRequest {
            class,
            bytecode: &previous,
        };
        self.runtime.redefine(&[request]).map_err(diagnose)?;
        if let Some(record) = self.records.get_mut(class) {
            record.generations.pop();
        }
        Ok(())
    }

    /// Snap a class straight back to its classpath original, dropping all generations
    pub fn restore_original(&mut self, class: &ClassId) -> Result<(), Error> {
        if !self.records.contains_key(class) {
            return Err(RedefinitionError::NothingToRestore {
                class_name: class.name.clone(),
            }
            .into());
        }
        self.install_original(class)?;
        self.records.remove(class);
        Ok(())
    }

    /// Restore every redefined class in one atomic batch
    pub fn restore_all(&mut self) -> Result<(), Error> {
        let classes: Vec<ClassId> = self.records.keys().cloned().collect();
        if classes.is_empty() {
            return Ok(());
        }
        let mut originals = Vec::with_capacity(classes.len());
        for class in &classes {
            originals.push(self.classpath.get(class.loader, &class.name)?);
        }
        let requests: Vec<RedefinitionRequest> = classes
            .iter()
            .zip(&originals)
            .map(|(class, bytecode)| RedefinitionRequest {
                class,
                bytecode,
            })
            .collect();
        self.runtime.redefine(&requests).map_err(diagnose)?;
        self.records.clear();
        Ok(())
    }

    fn install_original(&mut self, class: &ClassId) -> Result<(), Error> {
        let original = self.classpath.get(class.loader, &class.name)?;
        let request = RedefinitionRequest {
            class,
            bytecode: &original,
        };
        self.runtime.redefine(&[request]).map_err(diagnose)?;
        Ok(())
    }
}

/// Turn a generic rejection into an actionable missing-dependency error when the reason names an
/// unloaded class
fn diagnose(err: RedefinitionError) -> Error {
    match err {
        RedefinitionError::Rejected { class_name, reason } => {
            match reason.strip_prefix(UNLOADED_CLASS_REASON) {
                Some(dependency) if !dependency.is_empty() => {
                    RedefinitionError::MissingDependency {
                        class_name,
                        dependency: dependency.to_owned(),
                    }
                    .into()
                }
                _ => RedefinitionError::Rejected { class_name, reason }.into(),
            }
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classpath::LoaderId;

    /// In-memory runtime that remembers the live bytecode per class
    struct RecordingRuntime {
        live: HashMap<ClassId, Vec<u8>>,
        reject_with: Option<String>,
    }

    impl RecordingRuntime {
        fn new() -> RecordingRuntime {
            RecordingRuntime {
                live: HashMap::new(),
                reject_with: None,
            }
        }
    }

    impl CodeReplacement for RecordingRuntime {
        fn redefine(&mut self, batch: &[RedefinitionRequest]) -> Result<(), RedefinitionError> {
            if let Some(reason) = &self.reject_with {
                return Err(RedefinitionError::Rejected {
                    class_name: batch[0].class.name.clone(),
                    reason: reason.clone(),
                });
            }
            for request in batch {
                self.live
                    .insert(request.class.clone(), request.bytecode.to_vec());
            }
            Ok(())
        }
    }

    struct FixedProvider;

    impl ClassBytesProvider for FixedProvider {
        fn class_bytes(&self, _: LoaderId, class_name: &str) -> Result<Vec<u8>, Error> {
            Ok(format!("original:{}", class_name).into_bytes())
        }
    }

    fn engine() -> RedefinitionEngine<RecordingRuntime, FixedProvider> {
        RedefinitionEngine::new(RecordingRuntime::new(), ClassBytesSource::new(FixedProvider))
    }

    fn target() -> ClassId {
        ClassId::new(LoaderId(1), "sample/Target")
    }

    #[test]
    fn generations_stack_and_unwind_one_step_at_a_time() {
        let mut engine = engine();
        let class = target();

        engine
            .redefine_class(class.clone(), b"gen1".to_vec(), Some("fakes/A".to_owned()))
            .unwrap();
        engine
            .redefine_class(class.clone(), b"gen2".to_vec(), Some("fakes/B".to_owned()))
            .unwrap();
        assert_eq!(engine.generation(&class), 2);
        assert_eq!(engine.originating_substitute(&class), Some("fakes/B"));
        assert_eq!(engine.runtime.live[&class], b"gen2".to_vec());

        engine.restore_last(&class).unwrap();
        assert_eq!(engine.generation(&class), 1);
        assert_eq!(engine.runtime.live[&class], b"gen1".to_vec());

        engine.restore_last(&class).unwrap();
        assert_eq!(engine.generation(&class), 0);
        assert_eq!(
            engine.runtime.live[&class],
            b"original:sample/Target".to_vec(),
        );
    }

    #[test]
    fn restore_original_skips_intermediate_generations() {
        let mut engine = engine();
        let class = target();

        engine
            .redefine_class(class.clone(), b"gen1".to_vec(), None)
            .unwrap();
        engine
            .redefine_class(class.clone(), b"gen2".to_vec(), None)
            .unwrap();
        engine.restore_original(&class).unwrap();
        assert_eq!(engine.generation(&class), 0);
        assert_eq!(
            engine.runtime.live[&class],
            b"original:sample/Target".to_vec(),
        );
    }

    #[test]
    fn restoring_an_untouched_class_fails() {
        let mut engine = engine();
        match engine.restore_last(&target()) {
            Err(Error::Redefinition(RedefinitionError::NothingToRestore { class_name })) => {
                assert_eq!(class_name, "sample/Target");
            }
            other => panic!("expected nothing-to-restore, got {:?}", other.err()),
        }
    }

    #[test]
    fn unloaded_class_rejections_become_missing_dependency_errors() {
        let mut engine = engine();
        engine.runtime.reject_with = Some(format!("{}sample/Dep", UNLOADED_CLASS_REASON));

        match engine.redefine_class(target(), b"gen1".to_vec(), None) {
            Err(Error::Redefinition(RedefinitionError::MissingDependency {
                class_name,
                dependency,
            })) => {
                assert_eq!(class_name, "sample/Target");
                assert_eq!(dependency, "sample/Dep");
            }
            other => panic!("expected missing dependency, got {:?}", other.err()),
        }
        // The failed batch left no record behind
        assert_eq!(engine.generation(&target()), 0);
    }

    #[test]
    fn other_rejections_pass_through_unchanged() {
        let mut engine = engine();
        engine.runtime.reject_with = Some("schema change".to_owned());

        assert!(matches!(
            engine.redefine_class(target(), b"gen1".to_vec(), None),
            Err(Error::Redefinition(RedefinitionError::Rejected { .. })),
        ));
    }

    #[test]
    fn rejected_restore_keeps_the_generation_stack_intact() {
        let mut engine = engine();
        let class = target();

        engine
            .redefine_class(class.clone(), b"gen1".to_vec(), None)
            .unwrap();
        engine
            .redefine_class(class.clone(), b"gen2".to_vec(), None)
            .unwrap();

        engine.runtime.reject_with = Some("schema change".to_owned());
        assert!(engine.restore_last(&class).is_err());
        assert_eq!(engine.generation(&class), 2);
        assert_eq!(engine.runtime.live[&class], b"gen2".to_vec());
        assert!(engine.restore_original(&class).is_err());
        assert_eq!(engine.generation(&class), 2);

        // Once the runtime accepts again, the walk-back picks up exactly where it left off
        engine.runtime.reject_with = None;
        engine.restore_last(&class).unwrap();
        assert_eq!(engine.generation(&class), 1);
        assert_eq!(engine.runtime.live[&class], b"gen1".to_vec());
        engine.restore_last(&class).unwrap();
        assert_eq!(engine.generation(&class), 0);
        assert_eq!(
            engine.runtime.live[&class],
            b"original:sample/Target".to_vec(),
        );
    }

    #[test]
    fn restore_all_reinstates_every_class_in_one_batch() {
        let mut engine = engine();
        let first = target();
        let second = ClassId::new(LoaderId(2), "sample/Other");

        engine
            .redefine_classes(vec![
                (first.clone(), b"gen1".to_vec(), None),
                (second.clone(), b"gen1".to_vec(), None),
            ])
            .unwrap();
        engine.restore_all().unwrap();

        assert_eq!(engine.generation(&first), 0);
        assert_eq!(engine.generation(&second), 0);
        assert_eq!(
            engine.runtime.live[&second],
            b"original:sample/Other".to_vec(),
        );
    }
}
