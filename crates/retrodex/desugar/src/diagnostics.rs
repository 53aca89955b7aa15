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

//! Non-fatal desugaring findings

use parking_lot::Mutex;
use retrodex_common::{MethodRef, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A referenced type is not available at desugar time
    MissingType,
    /// A program class is also defined by the library; the program definition wins
    DuplicateType,
    /// A rewrite could not preserve verifiability of a call
    UnverifiableResult,
}

/// Where in the input a finding originates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourcePosition {
    Unknown,
    Method { method: MethodRef, line: Option<u32> },
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("<unknown>"),
            Self::Method { method, line: Some(line) } => write!(f, "{}:{}", method, line),
            Self::Method { method, line: None } => write!(f, "{}", method),
        }
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DesugarDiagnostic {
    pub kind: DiagnosticKind,
    /// The missing or duplicated type, or the owner of the unverifiable call
    pub referenced_type: TypeRef,
    /// The class being desugared when the finding was made
    pub context_type: TypeRef,
    pub position: SourcePosition,
    /// The exact method an unverifiable result concerns
    pub method: Option<MethodRef>,
}

impl DesugarDiagnostic {
    pub fn missing_type(missing: TypeRef, context: TypeRef, position: SourcePosition) -> Self {
        Self {
            kind: DiagnosticKind::MissingType,
            referenced_type: missing,
            context_type: context,
            position,
            method: None,
        }
    }

    pub fn duplicate_type(duplicate: TypeRef) -> Self {
        Self {
            kind: DiagnosticKind::DuplicateType,
            context_type: duplicate.clone(),
            referenced_type: duplicate,
            position: SourcePosition::Unknown,
            method: None,
        }
    }

    pub fn unverifiable(method: MethodRef, context: TypeRef, position: SourcePosition) -> Self {
        Self {
            kind: DiagnosticKind::UnverifiableResult,
            referenced_type: method.owner.clone(),
            context_type: context,
            position,
            method: Some(method),
        }
    }

    fn dedup_key(&self) -> DiagnosticKey {
        (self.kind, self.referenced_type.clone(), self.context_type.clone(), self.method.clone())
    }
}

impl fmt::Display for DesugarDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::MissingType => write!(
                f,
                "Type {} was not found, it is required for desugaring {} ({})",
                self.referenced_type, self.context_type, self.position
            ),
            DiagnosticKind::DuplicateType => write!(f, "Type {} is defined by both the program and the library", self.referenced_type),
            DiagnosticKind::UnverifiableResult => match &self.method {
                Some(method) => write!(f, "Call to {} in {} may not verify ({})", method, self.context_type, self.position),
                None => write!(f, "Code in {} may not verify ({})", self.context_type, self.position),
            },
        }
    }
}

type DiagnosticKey = (DiagnosticKind, TypeRef, TypeRef, Option<MethodRef>);

/// Thread-safe sink for diagnostics
///
/// A finding about the same type, context and method is kept once; the first
/// position recorded wins. Each context type is processed by a single worker,
/// so the surviving position does not depend on scheduling.
#[derive(Debug, Default)]
pub struct DiagnosticsCollector {
    findings: Mutex<BTreeMap<DiagnosticKey, DesugarDiagnostic>>,
}

impl DiagnosticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finding, returning whether it was new
    pub fn record(&self, diagnostic: DesugarDiagnostic) -> bool {
        let mut findings = self.findings.lock();
        let key = diagnostic.dedup_key();
        if findings.contains_key(&key) {
            return false;
        }
        warn!(kind = ?diagnostic.kind, "{}", diagnostic);
        findings.insert(key, diagnostic);
        true
    }

    pub fn len(&self) -> usize {
        self.findings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.lock().is_empty()
    }

    /// All findings in sorted order
    pub fn into_sorted(self) -> Vec<DesugarDiagnostic> {
        let mut findings: Vec<DesugarDiagnostic> = self.findings.into_inner().into_values().collect();
        findings.sort();
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_finding_recorded_once() {
        let collector = DiagnosticsCollector::new();
        let method = MethodRef::parse("a/Main", "run", "()V").unwrap();
        let first = DesugarDiagnostic::missing_type(
            TypeRef::new("a/Gone"),
            TypeRef::new("a/Main"),
            SourcePosition::Method {
                method: method.clone(),
                line: Some(4),
            },
        );
        let second = DesugarDiagnostic::missing_type(TypeRef::new("a/Gone"), TypeRef::new("a/Main"), SourcePosition::Unknown);
        assert!(collector.record(first.clone()));
        assert!(!collector.record(second));
        let findings = collector.into_sorted();
        assert_eq!(findings, vec![first]);
    }

    #[test]
    fn test_distinct_contexts_kept() {
        let collector = DiagnosticsCollector::new();
        collector.record(DesugarDiagnostic::missing_type(TypeRef::new("a/Gone"), TypeRef::new("a/B"), SourcePosition::Unknown));
        collector.record(DesugarDiagnostic::missing_type(TypeRef::new("a/Gone"), TypeRef::new("a/A"), SourcePosition::Unknown));
        collector.record(DesugarDiagnostic::duplicate_type(TypeRef::new("java/util/List")));
        let findings = collector.into_sorted();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].context_type, TypeRef::new("a/A"));
        assert_eq!(findings[2].kind, DiagnosticKind::DuplicateType);
    }

    #[test]
    fn test_display() {
        let diagnostic = DesugarDiagnostic::unverifiable(
            MethodRef::parse("a/C", "m", "()V").unwrap(),
            TypeRef::new("a/Main"),
            SourcePosition::Unknown,
        );
        assert_eq!(diagnostic.to_string(), "Call to a/C.m()V in a/Main may not verify (<unknown>)");
    }
}
