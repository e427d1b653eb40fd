//! JavaScript language definition

use super::{ChunkKind, LanguageDef};

const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(class_declaration
  name: (identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method
"#;

const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function", ChunkKind::Function),
    ("class", ChunkKind::Class),
    ("method", ChunkKind::Method),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "javascript",
    grammar: Some(|| tree_sitter_javascript::LANGUAGE.into()),
    extensions: &["js", "jsx", "mjs", "cjs"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
