//! Language registry for code parsing
//!
//! This module provides a registry of supported programming languages,
//! each with its own tree-sitter grammar, query patterns, and extraction
//! rules. Languages are registered at compile time based on feature flags.
//!
//! # Feature Flags
//!
//! - `lang-rust` - Rust support (enabled by default)
//! - `lang-python` - Python support (enabled by default)
//! - `lang-typescript` - TypeScript support (enabled by default)
//! - `lang-javascript` - JavaScript support (enabled by default)
//! - `lang-go` - Go support (enabled by default)
//! - `lang-c` - C support (enabled by default)
//! - `lang-java` - Java support (enabled by default)
//! - `lang-markdown` - Markdown support, grammar-less (enabled by default)
//! - `lang-all` - All languages

use std::collections::HashMap;
use std::sync::LazyLock;

#[cfg(feature = "lang-c")]
mod c;
#[cfg(feature = "lang-go")]
mod go;
#[cfg(feature = "lang-java")]
mod java;
#[cfg(feature = "lang-javascript")]
mod javascript;
#[cfg(feature = "lang-python")]
mod python;
#[cfg(feature = "lang-rust")]
mod rust;
#[cfg(feature = "lang-typescript")]
mod typescript;

/// A language definition with all parsing configuration
pub struct LanguageDef {
    /// Language name (e.g., "rust", "python")
    pub name: &'static str,
    /// Function to get the tree-sitter grammar (None for custom parsers)
    pub grammar: Option<fn() -> tree_sitter::Language>,
    /// File extensions for this language
    pub extensions: &'static [&'static str],
    /// Tree-sitter query for extracting code chunks (empty for custom parsers)
    pub chunk_query: &'static str,
    /// Mapping from tree-sitter capture names to chunk kinds
    pub kind_map: &'static [(&'static str, ChunkKind)],
}

/// Kind of element a chunk was extracted as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Standalone function
    Function,
    /// Method (function inside a class/struct/impl)
    Method,
    /// Class definition (Python, TypeScript, JavaScript, Java)
    Class,
    /// Struct definition (Rust, Go, C)
    Struct,
    /// Enum definition
    Enum,
    /// Trait definition (Rust)
    Trait,
    /// Interface definition (TypeScript, Go, Java)
    Interface,
    /// Constant or static variable
    Constant,
    /// Documentation string (Python module docstrings)
    Docstring,
    /// Freestanding comment block
    Comment,
    /// Markdown heading
    Heading,
    /// Markdown fenced code block
    CodeBlock,
    /// Markdown prose paragraph
    Paragraph,
}

impl ChunkKind {
    /// String representation for database storage and the wire protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Struct => "struct",
            ChunkKind::Enum => "enum",
            ChunkKind::Trait => "trait",
            ChunkKind::Interface => "interface",
            ChunkKind::Constant => "constant",
            ChunkKind::Docstring => "docstring",
            ChunkKind::Comment => "comment",
            ChunkKind::Heading => "heading",
            ChunkKind::CodeBlock => "code_block",
            ChunkKind::Paragraph => "paragraph",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an invalid ChunkKind string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChunkKindError {
    /// The invalid input string
    pub input: String,
}

impl std::fmt::Display for ParseChunkKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown chunk kind: '{}'", self.input)
    }
}

impl std::error::Error for ParseChunkKindError {}

impl std::str::FromStr for ChunkKind {
    type Err = ParseChunkKindError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "function" => Ok(ChunkKind::Function),
            "method" => Ok(ChunkKind::Method),
            "class" => Ok(ChunkKind::Class),
            "struct" => Ok(ChunkKind::Struct),
            "enum" => Ok(ChunkKind::Enum),
            "trait" => Ok(ChunkKind::Trait),
            "interface" => Ok(ChunkKind::Interface),
            "constant" => Ok(ChunkKind::Constant),
            "docstring" => Ok(ChunkKind::Docstring),
            "comment" => Ok(ChunkKind::Comment),
            "heading" => Ok(ChunkKind::Heading),
            "code_block" => Ok(ChunkKind::CodeBlock),
            "paragraph" => Ok(ChunkKind::Paragraph),
            _ => Err(ParseChunkKindError {
                input: s.to_string(),
            }),
        }
    }
}

/// Global language registry
pub static REGISTRY: LazyLock<LanguageRegistry> = LazyLock::new(LanguageRegistry::new);

/// Registry of all supported languages
pub struct LanguageRegistry {
    /// Languages indexed by name
    by_name: HashMap<&'static str, &'static LanguageDef>,
    /// Languages indexed by extension
    by_extension: HashMap<&'static str, &'static LanguageDef>,
}

impl LanguageRegistry {
    /// Create a new registry with all enabled languages
    fn new() -> Self {
        let mut reg = Self {
            by_name: HashMap::new(),
            by_extension: HashMap::new(),
        };

        // Register all enabled languages based on feature flags
        #[cfg(feature = "lang-rust")]
        reg.register(rust::definition());

        #[cfg(feature = "lang-python")]
        reg.register(python::definition());

        #[cfg(feature = "lang-typescript")]
        reg.register(typescript::definition());

        #[cfg(feature = "lang-javascript")]
        reg.register(javascript::definition());

        #[cfg(feature = "lang-go")]
        reg.register(go::definition());

        #[cfg(feature = "lang-c")]
        reg.register(c::definition());

        #[cfg(feature = "lang-java")]
        reg.register(java::definition());

        #[cfg(feature = "lang-markdown")]
        reg.register(&MARKDOWN_DEF);

        reg
    }

    fn register(&mut self, def: &'static LanguageDef) {
        self.by_name.insert(def.name, def);
        for ext in def.extensions {
            self.by_extension.insert(*ext, def);
        }
    }

    /// Get a language definition by name
    pub fn get(&self, name: &str) -> Option<&'static LanguageDef> {
        self.by_name.get(name).copied()
    }

    /// Get a language definition by file extension
    pub fn from_extension(&self, ext: &str) -> Option<&'static LanguageDef> {
        self.by_extension.get(ext).copied()
    }

    /// Iterate over all registered languages
    pub fn all(&self) -> impl Iterator<Item = &'static LanguageDef> + '_ {
        self.by_name.values().copied()
    }

    /// Get all supported extensions
    pub fn supported_extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_extension.keys().copied()
    }
}

/// Markdown is grammar-less; its chunks come from the custom parser in
/// `crate::parser::markdown`.
#[cfg(feature = "lang-markdown")]
static MARKDOWN_DEF: LanguageDef = LanguageDef {
    name: "markdown",
    grammar: None,
    extensions: &["md", "markdown"],
    chunk_query: "",
    kind_map: &[],
};

/// Look up the language name for a path, if its extension is registered.
pub fn language_for_path(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str())?;
    REGISTRY.from_extension(ext).map(|def| def.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "lang-rust")]
    fn test_registry_by_name() {
        let rust = REGISTRY.get("rust");
        assert!(rust.is_some());
        assert_eq!(rust.unwrap().name, "rust");
        assert_eq!(rust.unwrap().extensions, &["rs"]);
    }

    #[test]
    fn test_registry_by_extension() {
        #[cfg(feature = "lang-rust")]
        assert!(REGISTRY.from_extension("rs").is_some());
        #[cfg(feature = "lang-python")]
        assert!(REGISTRY.from_extension("py").is_some());
        #[cfg(feature = "lang-markdown")]
        assert!(REGISTRY.from_extension("md").is_some());
        assert!(REGISTRY.from_extension("xyz").is_none());
    }

    #[test]
    fn test_chunk_kind_round_trip() {
        for kind in [
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::Class,
            ChunkKind::Struct,
            ChunkKind::Enum,
            ChunkKind::Trait,
            ChunkKind::Interface,
            ChunkKind::Constant,
            ChunkKind::Docstring,
            ChunkKind::Comment,
            ChunkKind::Heading,
            ChunkKind::CodeBlock,
            ChunkKind::Paragraph,
        ] {
            let s = kind.to_string();
            let parsed: ChunkKind = s.parse().unwrap();
            assert_eq!(kind, parsed, "Round-trip failed for {s}");
        }
    }

    #[test]
    #[cfg(feature = "lang-python")]
    fn test_language_for_path() {
        use std::path::Path;
        assert_eq!(language_for_path(Path::new("a/b/app.py")), Some("python"));
        assert_eq!(language_for_path(Path::new("noext")), None);
    }
}
