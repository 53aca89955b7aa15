// Retrodex
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Desugaring pipeline
//!
//! Classes are processed independently, optionally on a rayon pool. Each
//! worker runs the planned passes on its class, commits relocated interface
//! bodies to the shared companions and registers the lambda classes it
//! produced. Output is assembled in name order once every worker finished, so
//! the result does not depend on scheduling.

use crate::config::DesugarConfig;
use crate::context::DesugarContext;
use crate::diagnostics::{DesugarDiagnostic, DiagnosticsCollector};
use crate::error::{ClassFailure, DesugarError, DesugarResult};
use crate::features::FeatureModel;
use crate::hierarchy::AppView;
use crate::metrics::{Artifact, MetricsRecorder, PassMetrics};
use crate::naming::NamingRegistry;
use crate::output::{DesugaredProgram, attach_bridges, attach_nest_members};
use crate::passes::backport::catalog::BackportCatalog;
use crate::passes::interfaces::emulated::DispatchCache;
use crate::passes::{ClassWork, Desugaring};
use crate::synthetic::SyntheticItems;
use rayon::prelude::*;
use retrodex_common::{ClassDef, MemberKey, MethodDef, Program, TypeRef};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Desugaring engine for one configuration
pub struct Desugarer {
    config: DesugarConfig,
    features: FeatureModel,
    catalog: BackportCatalog,
}

impl Desugarer {
    /// Create an engine with the standard backport catalog
    pub fn new(config: DesugarConfig) -> DesugarResult<Self> {
        Self::with_catalog(config, BackportCatalog::standard()?)
    }

    /// Create an engine backporting the methods of `catalog`
    pub fn with_catalog(config: DesugarConfig, catalog: BackportCatalog) -> DesugarResult<Self> {
        config.validate()?;
        let mut features = FeatureModel::new(&config.platform);
        for entry in catalog.entries() {
            features.register_library_method(entry.method.clone(), entry.introduced);
        }
        Ok(Self { config, features, catalog })
    }

    pub fn config(&self) -> &DesugarConfig {
        &self.config
    }

    pub fn features(&self) -> &FeatureModel {
        &self.features
    }

    /// Desugar every program class of `program`
    ///
    /// Classpath and library classes are only consulted. A class that cannot
    /// be desugared does not stop the others; all failures are reported
    /// together once every class was attempted.
    #[instrument(skip_all, fields(classes = program.len(), min_api = %self.config.min_api))]
    pub fn desugar(&self, program: &Program) -> DesugarResult<DesugaredProgram> {
        let started = Instant::now();
        let registry = NamingRegistry::with_reserved(
            program
                .program_classes()
                .chain(program.classpath_classes())
                .chain(program.library_classes())
                .map(|class| class.name.clone()),
        );
        let synthetics = SyntheticItems::new();
        let diagnostics = DiagnosticsCollector::new();
        let recorder = MetricsRecorder::new();

        for class in program.program_classes() {
            if program.library_class(&class.name).is_some() {
                diagnostics.record(DesugarDiagnostic::duplicate_type(class.name.clone()));
            }
        }

        let ctx = DesugarContext {
            config: &self.config,
            features: &self.features,
            catalog: &self.catalog,
            app: AppView::new(program, &self.config),
            registry: &registry,
            synthetics: &synthetics,
            diagnostics: &diagnostics,
            metrics: &recorder,
            dispatch: DispatchCache::new(),
        };
        let classes: Vec<&ClassDef> = program.program_classes().collect();
        let outcomes = self.process_all(&ctx, &classes)?;
        drop(ctx);

        let mut processed = BTreeMap::new();
        let mut failures = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(class) => {
                    processed.insert(name, class);
                }
                Err(error) => failures.push(ClassFailure {
                    class: name,
                    error: Box::new(error),
                }),
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.class.cmp(&b.class));
            return Err(DesugarError::ClassesFailed { failures });
        }

        let synthetic_names = registry.table();
        let output = synthetics.into_output();
        let mut classes = processed;
        for class in output.classes {
            if classes.contains_key(&class.name) {
                return Err(DesugarError::internal_error(format!("synthesized class {} shadows a program class", class.name)));
            }
            classes.insert(class.name.clone(), class);
        }
        let mut deferred_members: BTreeMap<TypeRef, BTreeMap<MemberKey, MethodDef>> = BTreeMap::new();
        for (host, bridges) in output.bridges {
            match classes.get_mut(&host) {
                Some(class) => attach_bridges(class, bridges)?,
                None => deferred_members
                    .entry(host)
                    .or_default()
                    .extend(bridges.into_iter().map(|bridge| (bridge.key(), bridge))),
            }
        }
        let mut deferred_nest_members = BTreeMap::new();
        for (host, members) in output.nest_members {
            match classes.get_mut(&host) {
                Some(class) => attach_nest_members(class, members),
                None => {
                    deferred_nest_members.insert(host, members);
                }
            }
        }

        let diagnostics = diagnostics.into_sorted();
        let metrics = recorder.snapshot(diagnostics.len(), started.elapsed().as_millis());
        metrics.publish();
        info!(
            classes = classes.len(),
            synthesized = metrics.total_artifacts(),
            deferred = deferred_members.len() + deferred_nest_members.len(),
            diagnostics = diagnostics.len(),
            duration_ms = metrics.duration_ms as u64,
            "desugaring finished"
        );
        Ok(DesugaredProgram::new(
            classes,
            deferred_members,
            deferred_nest_members,
            diagnostics,
            synthetic_names,
            metrics,
        ))
    }

    fn process_all(&self, ctx: &DesugarContext<'_>, classes: &[&ClassDef]) -> DesugarResult<Vec<(TypeRef, DesugarResult<ClassDef>)>> {
        if !self.config.parallel {
            return Ok(classes.iter().map(|class| (class.name.clone(), process_class(ctx, class))).collect());
        }
        let run = || {
            classes
                .par_iter()
                .map(|class| (class.name.clone(), process_class(ctx, class)))
                .collect::<Vec<_>>()
        };
        match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| DesugarError::internal_error(format!("failed to build worker pool: {e}")))?;
                Ok(pool.install(run))
            }
            None => Ok(run()),
        }
    }
}

/// Desugar one program class and register what it synthesized
#[instrument(skip_all, fields(class = %class.name))]
fn process_class(ctx: &DesugarContext<'_>, class: &ClassDef) -> DesugarResult<ClassDef> {
    class.validate()?;
    let mut work = ClassWork::new(class.clone());
    run_passes(ctx, &mut work, &Desugaring::ORDER)?;

    for lambda in std::mem::take(&mut work.lambda_classes) {
        let mut lambda_work = ClassWork::synthesized(lambda);
        run_passes(ctx, &mut lambda_work, &Desugaring::LAMBDA_CLASS_ORDER)?;
        commit_relocated(ctx, &lambda_work)?;
        ctx.synthetics.add_class(lambda_work.class)?;
    }
    commit_relocated(ctx, &work)?;
    ctx.metrics.record_class();
    Ok(work.class)
}

fn run_passes(ctx: &DesugarContext<'_>, work: &mut ClassWork, order: &[Desugaring]) -> DesugarResult<()> {
    for pass in Desugaring::plan(ctx, order) {
        let started = Instant::now();
        let changed = pass.run(ctx, work)?;
        ctx.metrics.record_pass(PassMetrics {
            pass_name: pass.name().to_string(),
            duration_ms: started.elapsed().as_millis(),
            changed,
        });
        if changed {
            debug!(class = %work.class.name, pass = pass.name(), "pass rewrote class");
        }
    }
    Ok(())
}

/// Move the bodies relocated out of an interface into its companion
fn commit_relocated(ctx: &DesugarContext<'_>, work: &ClassWork) -> DesugarResult<()> {
    if work.relocated.is_empty() {
        return Ok(());
    }
    let name = ctx.companion_name(&work.class.name)?;
    let (companion, created) = ctx.synthetics.companion(&work.class.name, name, work.class.source_file.clone());
    if created {
        ctx.metrics.record_artifact(Artifact::Companion);
    }
    for relocated in &work.relocated {
        if !companion.add_method(relocated.method.clone()) {
            return Err(DesugarError::internal_error(format!(
                "companion {} already holds {}",
                companion.name, relocated.method.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrodex_common::{AccessFlags, ApiLevel, CodeBuilder, InvokeKind, MethodProto, MethodRef, ValueKind, ValueType};

    fn caller() -> ClassDef {
        let proto = MethodProto::new(vec![ValueType::Int, ValueType::Int], Some(ValueType::Int));
        let mut body = CodeBuilder::for_method(&proto, true);
        body.load(ValueKind::Int, 0)
            .load(ValueKind::Int, 1)
            .invoke(InvokeKind::Static, MethodRef::parse("java/lang/Integer", "compare", "(II)I").unwrap(), false)
            .ret(Some(ValueKind::Int));
        ClassDef::class("app/Caller").with_method(MethodDef::new("cmp", proto, AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()))
    }

    fn program() -> Program {
        Program::from_parts(vec![caller()], Vec::new(), vec![ClassDef::class("java/lang/Integer")]).unwrap()
    }

    #[test]
    fn test_backport_synthesized_below_threshold() {
        let desugarer = Desugarer::new(DesugarConfig::for_api(ApiLevel::B).with_parallelism(false)).unwrap();
        let output = desugarer.desugar(&program()).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output.metrics().artifacts.backports, 1);
        assert_eq!(output.metrics().classes_processed, 1);
    }

    #[test]
    fn test_identity_at_native_level() {
        let desugarer = Desugarer::new(DesugarConfig::for_api(ApiLevel::MASTER)).unwrap();
        let output = desugarer.desugar(&program()).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output.class("app/Caller"), Some(&caller()));
        assert!(output.synthetic_names().is_empty());
    }

    #[test]
    fn test_invalid_thread_count_rejected() {
        let config = DesugarConfig::for_api(ApiLevel::B).with_threads(0);
        assert!(matches!(Desugarer::new(config), Err(DesugarError::ConfigurationValidationError { .. })));
    }

    #[test]
    fn test_dedicated_pool() {
        let desugarer = Desugarer::new(DesugarConfig::for_api(ApiLevel::B).with_threads(2)).unwrap();
        let output = desugarer.desugar(&program()).unwrap();
        assert_eq!(output.metrics().artifacts.backports, 1);
    }

    #[test]
    fn test_duplicate_library_type_reported() {
        let program = Program::from_parts(vec![ClassDef::class("java/lang/Integer")], Vec::new(), vec![ClassDef::class("java/lang/Integer")]).unwrap();
        let output = Desugarer::new(DesugarConfig::for_api(ApiLevel::B)).unwrap().desugar(&program).unwrap();
        assert_eq!(output.diagnostics().len(), 1);
    }
}
