//! Compilation of decoded source into an executable unit.

use rhai::{Engine, ParseError, AST};
use std::path::{Path, PathBuf};

/// A compiled script bound to the file it was read from.
///
/// The AST's source is set to `origin`, so runtime errors and `debug`
/// output report the real file.
#[derive(Clone, Debug)]
pub struct CompiledScript {
    ast: AST,
    origin: PathBuf,
}

impl CompiledScript {
    #[must_use]
    pub fn ast(&self) -> &AST {
        &self.ast
    }

    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Source location recorded in the AST.
    #[must_use]
    pub fn reported_source(&self) -> Option<&str> {
        self.ast.source()
    }
}

/// Compile `text` with `engine` as a top-level statement block.
///
/// The engine is expected to run with optimisation disabled so no statement
/// is folded away; see [`crate::runtime::engine::build_engine`].
pub fn compile(engine: &Engine, text: &str, origin: &Path) -> Result<CompiledScript, ParseError> {
    let mut ast = engine.compile(text)?;
    ast.set_source(origin.to_string_lossy().into_owned());
    Ok(CompiledScript {
        ast,
        origin: origin.to_path_buf(),
    })
}
