//! TypeScript language definition

use super::{ChunkKind, LanguageDef};

const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(class_declaration
  name: (type_identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method

(interface_declaration
  name: (type_identifier) @name) @interface

(enum_declaration
  name: (identifier) @name) @enum
"#;

const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function", ChunkKind::Function),
    ("class", ChunkKind::Class),
    ("method", ChunkKind::Method),
    ("interface", ChunkKind::Interface),
    ("enum", ChunkKind::Enum),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "typescript",
    grammar: Some(|| tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
    extensions: &["ts", "tsx", "mts"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
