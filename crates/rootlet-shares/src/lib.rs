//! # rootlet-shares
//!
//! The directory-sharing configuration language and its expansion into
//! guest mounts. One rule per line (`SOURCE DEST [OPTIONS]`) selects a
//! host directory by category and binds it at a guest destination.

pub mod lexer;
pub mod mounter;
pub mod parser;

pub use mounter::{ShareBases, ShareMounter};
pub use parser::{LineError, ShareCategory, ShareConfig, ShareRule};
