//! Python language definition

use super::{ChunkKind, LanguageDef};

/// Tree-sitter query for extracting Python code chunks
///
/// Methods are functions nested under a class body; the extractor dedupes
/// the double match against the bare function pattern, preferring `method`.
const CHUNK_QUERY: &str = r#"
(module
  (function_definition
    name: (identifier) @name) @function)

(module
  (decorated_definition
    (function_definition
      name: (identifier) @name) @function))

(class_definition
  name: (identifier) @name) @class

(class_definition
  body: (block
    (function_definition
      name: (identifier) @name) @method))

(class_definition
  body: (block
    (decorated_definition
      (function_definition
        name: (identifier) @name) @method)))

(module
  .
  (expression_statement
    (string) @docstring))
"#;

const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function", ChunkKind::Function),
    ("method", ChunkKind::Method),
    ("class", ChunkKind::Class),
    ("docstring", ChunkKind::Docstring),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "python",
    grammar: Some(|| tree_sitter_python::LANGUAGE.into()),
    extensions: &["py", "pyi"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
