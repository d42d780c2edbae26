// src/analyzer/mod.rs
//! Front end for submitted sources: lexer, parser and the entry-point analyzer.

pub mod analysis;
pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use analysis::{
    is_entry_method, CodeAnalysisResult, MainMethod, SourceAnalyzer, SynthesizedEntry, SYNTHESIZED_MAIN,
};
pub use ast::{CompilationUnit, Span};
pub use lexer::tokenize;
pub use parser::{parse, Parser};
pub use token::{Token, TokenKind};
