use async_trait::async_trait;
use depgraph_core::{DepGraphError, Result};
use parking_lot::Mutex;
use std::path::Path;
use tree_sitter::{Parser, Tree};

use crate::factory::ModuleLoader;
use crate::language::{Language, LanguageRegistry};

/// Tree-sitter parser for one language. The underlying parser is not
/// reentrant, so calls are serialized.
pub struct TreeSitterEngine {
    language: Language,
    parser: Mutex<Parser>,
}

impl TreeSitterEngine {
    pub fn language(&self) -> Language {
        self.language
    }

    pub fn parse(&self, source: &str) -> Result<Tree> {
        self.parser.lock().parse(source, None).ok_or_else(|| {
            DepGraphError::Parse(format!("{} parser produced no tree", self.language))
        })
    }

    /// S-expression of the parsed syntax tree
    pub fn parse_to_sexp(&self, source: &str) -> Result<String> {
        Ok(self.parse(source)?.root_node().to_sexp())
    }
}

/// Loader for the grammars compiled into this binary.
///
/// The tree-sitter runtime is statically linked, so a runtime path is only
/// checked for existence. A grammar path, when given, must exist too; the
/// compiled-in grammar is used regardless.
#[derive(Default)]
pub struct TreeSitterLoader {
    registry: LanguageRegistry,
}

impl TreeSitterLoader {
    pub fn new() -> Self {
        Self {
            registry: LanguageRegistry::new(),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }
}

async fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    tokio::fs::metadata(path)
        .await
        .map(|_| ())
        .map_err(|e| DepGraphError::Parse(format!("{} {} unavailable: {}", what, path.display(), e)))
}

#[async_trait]
impl ModuleLoader for TreeSitterLoader {
    type Engine = TreeSitterEngine;

    async fn load_runtime(&self, runtime_module_path: Option<&Path>) -> Result<()> {
        if let Some(path) = runtime_module_path {
            ensure_exists(path, "parser runtime").await?;
        }
        Ok(())
    }

    async fn load_engine(
        &self,
        language: &str,
        grammar_path: Option<&Path>,
    ) -> Result<TreeSitterEngine> {
        let lang = Language::from_name(language)
            .ok_or_else(|| DepGraphError::Parse(format!("Unsupported language: {}", language)))?;

        if let Some(path) = grammar_path {
            ensure_exists(path, "grammar").await?;
        }

        let parser = self
            .registry
            .create_parser(&lang)
            .ok_or_else(|| DepGraphError::Parse(format!("Failed to configure {} parser", lang)))?;

        Ok(TreeSitterEngine {
            language: lang,
            parser: Mutex::new(parser),
        })
    }
}
