use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unexpected character `{ch}`")]
    UnexpectedChar { line: u32, ch: char },

    #[error("line {line}: expected {expected}, found `{found}`")]
    Unexpected {
        line: u32,
        expected: &'static str,
        found: String,
    },

    #[error("line {line}: unknown type `{name}`")]
    UnknownType { line: u32, name: String },

    #[error("line {line}: unknown instruction `{name}`")]
    UnknownInst { line: u32, name: String },

    #[error("line {line}: undefined value `{name}`")]
    UndefinedValue { line: u32, name: String },

    #[error("line {line}: undefined global `{name}`")]
    UndefinedGlobal { line: u32, name: String },

    #[error("line {line}: undefined function `{name}`")]
    UndefinedFunction { line: u32, name: String },

    #[error("line {line}: undefined block `block{num}`")]
    UndefinedBlock { line: u32, num: u32 },

    #[error("line {line}: malformed integer literal")]
    BadInteger { line: u32 },

    #[error("unexpected end of input")]
    UnexpectedEof,
}
