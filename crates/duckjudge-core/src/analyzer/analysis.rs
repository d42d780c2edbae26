// src/analyzer/analysis.rs
use duckjudge_types::ExecutionStyle;
use log::debug;

use super::ast::{
    AccessModifier, CompilationUnit, FuncDecl, GenericParam, Modifier, Span, TypeDecl, TypeKind, TypeMember, TypeRef,
    VarDecl,
};
use super::parser::Parser;
use crate::errors::SyntaxError;

/// Entry method inserted into sources that do not declare one.
pub const SYNTHESIZED_MAIN: &str = "public static void main(String[] args) {\n}";

/// An entry method stub that has to be spliced into the source before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedEntry {
    /// Byte offset in the original source; the class's closing brace.
    pub insert_at: usize,
    pub text: String,
}

impl SynthesizedEntry {
    pub fn apply(&self, source: &str) -> String {
        let mut out = String::with_capacity(source.len() + self.text.len());
        out.push_str(&source[..self.insert_at]);
        out.push_str(&self.text);
        out.push_str(&source[self.insert_at..]);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainMethod {
    pub class_name: String,
    /// Body braces of the entry method. For a synthesized entry these are
    /// offsets into the source after [`SynthesizedEntry::apply`].
    pub span: Span,
    pub synthesized: Option<SynthesizedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAnalysisResult {
    pub passed_validation: bool,
    pub main_method: Option<MainMethod>,
    pub main_class_name: String,
    /// Learner-facing reason when validation did not pass.
    pub failure: Option<String>,
}

impl CodeAnalysisResult {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            passed_validation: false,
            main_method: None,
            main_class_name: String::new(),
            failure: Some(reason.into()),
        }
    }

    pub fn main_method_span(&self) -> Option<Span> {
        self.main_method.as_ref().map(|m| m.span)
    }

    pub fn was_synthesized(&self) -> bool {
        self.main_method
            .as_ref()
            .is_some_and(|m| m.synthesized.is_some())
    }
}

/// Locates the entry class and method of a submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceAnalyzer {
    parser: Parser,
}

impl SourceAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&self, source: &str, style: ExecutionStyle) -> Result<CodeAnalysisResult, SyntaxError> {
        self.analyze_with_template(source, style, None)
    }

    /// Like [`analyze`](Self::analyze), additionally checking submissions
    /// against the declarations of an exercise template.
    pub fn analyze_with_template(
        &self,
        source: &str,
        style: ExecutionStyle,
        template: Option<&CompilationUnit>,
    ) -> Result<CodeAnalysisResult, SyntaxError> {
        let unit = self.parser.parse_source(source)?;

        let classes: Vec<&TypeDecl> = unit
            .top_level()
            .filter(|t| t.kind != TypeKind::Interface)
            .collect();
        if classes.is_empty() {
            return Ok(CodeAnalysisResult::failed("no top-level class declared"));
        }

        if let (ExecutionStyle::Submit, Some(template)) = (style, template) {
            if let Some(missing) = first_template_mismatch(template, &unit) {
                return Ok(CodeAnalysisResult::failed(format!("template mismatch: {missing}")));
            }
        }

        let candidates: Vec<(&TypeDecl, &FuncDecl)> = classes
            .iter()
            .filter_map(|t| t.functions().find(|f| is_entry_method(f)).map(|f| (*t, f)))
            .collect();

        let public: Vec<_> = candidates
            .iter()
            .filter(|(t, _)| t.access == AccessModifier::Public)
            .collect();

        let chosen = match (public.len(), candidates.len()) {
            (1, _) => Some(*public[0]),
            (0, 1) => Some(candidates[0]),
            (0, 0) => None,
            (0, _) => return Ok(CodeAnalysisResult::failed("more than one class declares main")),
            _ => return Ok(CodeAnalysisResult::failed("more than one public class declares main")),
        };

        if let Some((class, main)) = chosen {
            let Some(body) = &main.body else {
                return Ok(CodeAnalysisResult::failed("main has no body"));
            };
            debug!("entry point found in {} at {:?}", class.name, body.span);
            return Ok(CodeAnalysisResult {
                passed_validation: true,
                main_method: Some(MainMethod {
                    class_name: class.name.clone(),
                    span: body.span,
                    synthesized: None,
                }),
                main_class_name: class.name.clone(),
                failure: None,
            });
        }

        let target = classes
            .iter()
            .find(|t| t.access == AccessModifier::Public)
            .unwrap_or(&classes[0]);

        let insert_at = target.scope.end;
        let begin = insert_at + SYNTHESIZED_MAIN.find('{').unwrap_or(0);
        let end = insert_at + SYNTHESIZED_MAIN.len() - 1;
        debug!("synthesizing main in {} at offset {}", target.name, insert_at);

        Ok(CodeAnalysisResult {
            passed_validation: true,
            main_method: Some(MainMethod {
                class_name: target.name.clone(),
                span: Span::new(begin, end),
                synthesized: Some(SynthesizedEntry {
                    insert_at,
                    text: SYNTHESIZED_MAIN.to_string(),
                }),
            }),
            main_class_name: target.name.clone(),
            failure: None,
        })
    }
}

/// `public static void main(String[])` in any of its spellings.
pub fn is_entry_method(func: &FuncDecl) -> bool {
    let string_array = TypeRef::named("String").with_dims(1);
    func.name == "main"
        && func.access == AccessModifier::Public
        && func.is_static()
        && func.return_type == Some(TypeRef::Void)
        && func.params.len() == 1
        && func.params[0].effective_type().same_shape(&string_array)
}

/// First template declaration the submission does not reproduce, as a path
/// such as `Solution.solve` or `Solution.Node.next`.
///
/// Every template type, field, nested type, method and constructor needs a
/// counterpart with the same access, modifiers, generic parameters and
/// types; parameters also keep their names. Bodies and extra members are
/// free. A public template class with an entry method may be renamed, as
/// long as the submission's replacement is public and has one too.
fn first_template_mismatch(template: &CompilationUnit, submission: &CompilationUnit) -> Option<String> {
    for expected in template.top_level() {
        let by_name = submission.top_level().find(|t| t.name == expected.name);
        let actual = by_name.or_else(|| renamed_entry_class(expected, submission));
        let Some(actual) = actual else {
            return Some(expected.name.clone());
        };
        if let Some(path) = type_mismatch(template, expected, submission, actual) {
            return Some(path);
        }
    }
    None
}

fn declares_entry(decl: &TypeDecl) -> bool {
    decl.functions().any(is_entry_method)
}

fn renamed_entry_class<'a>(expected: &TypeDecl, submission: &'a CompilationUnit) -> Option<&'a TypeDecl> {
    if expected.access != AccessModifier::Public || !declares_entry(expected) {
        return None;
    }
    submission
        .top_level()
        .find(|t| t.access == AccessModifier::Public && declares_entry(t))
}

fn type_mismatch(
    template: &CompilationUnit,
    expected: &TypeDecl,
    submission: &CompilationUnit,
    actual: &TypeDecl,
) -> Option<String> {
    let here = &expected.name;
    let same_header = expected.kind == actual.kind
        && expected.access == actual.access
        && same_modifiers(&expected.modifiers, &actual.modifiers)
        && same_generics(&expected.generics, &actual.generics);
    if !same_header {
        return Some(here.clone());
    }

    for member in &expected.members {
        match member {
            TypeMember::Func(func) => {
                if !actual.functions().any(|f| same_signature(func, f)) {
                    return Some(format!("{}.{}", here, func.name));
                }
            }
            TypeMember::Var(field) => {
                if !actual.fields().any(|f| same_field(field, f)) {
                    return Some(format!("{}.{}", here, field.name));
                }
            }
            TypeMember::Nested(id) => {
                let nested = template.arena.get(*id);
                let counterpart = actual
                    .nested_types()
                    .map(|id| submission.arena.get(id))
                    .find(|t| t.name == nested.name);
                let Some(counterpart) = counterpart else {
                    return Some(format!("{}.{}", here, nested.name));
                };
                if let Some(path) = type_mismatch(template, nested, submission, counterpart) {
                    return Some(format!("{}.{}", here, path));
                }
            }
            TypeMember::Initializer(_) => {}
        }
    }
    None
}

/// Modifier lists compared as sets; Java does not care about their order.
fn same_modifiers(expected: &[Modifier], actual: &[Modifier]) -> bool {
    expected.iter().all(|m| actual.contains(m)) && actual.iter().all(|m| expected.contains(m))
}

fn same_generics(expected: &[GenericParam], actual: &[GenericParam]) -> bool {
    expected.len() == actual.len()
        && expected.iter().zip(actual).all(|(a, b)| {
            a.name == b.name
                && a.bounds.len() == b.bounds.len()
                && a.bounds.iter().zip(&b.bounds).all(|(x, y)| x.same_shape(y))
        })
}

fn same_field(expected: &VarDecl, actual: &VarDecl) -> bool {
    expected.name == actual.name
        && expected.access == actual.access
        && same_modifiers(&expected.modifiers, &actual.modifiers)
        && expected.ty.same_shape(&actual.ty)
}

fn same_signature(expected: &FuncDecl, actual: &FuncDecl) -> bool {
    let returns_match = match (&expected.return_type, &actual.return_type) {
        (Some(a), Some(b)) => a.same_shape(b),
        (None, None) => true,
        _ => false,
    };
    expected.name == actual.name
        && expected.access == actual.access
        && same_modifiers(&expected.modifiers, &actual.modifiers)
        && same_generics(&expected.generics, &actual.generics)
        && returns_match
        && expected.params.len() == actual.params.len()
        && expected.params.iter().zip(&actual.params).all(|(a, b)| {
            a.name == b.name && a.is_final == b.is_final && a.effective_type().same_shape(&b.effective_type())
        })
}
