//! Go language definition

use super::{ChunkKind, LanguageDef};

const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(method_declaration
  name: (field_identifier) @name) @method

(type_declaration
  (type_spec
    name: (type_identifier) @name
    type: (struct_type))) @struct

(type_declaration
  (type_spec
    name: (type_identifier) @name
    type: (interface_type))) @interface
"#;

const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function", ChunkKind::Function),
    ("method", ChunkKind::Method),
    ("struct", ChunkKind::Struct),
    ("interface", ChunkKind::Interface),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "go",
    grammar: Some(|| tree_sitter_go::LANGUAGE.into()),
    extensions: &["go"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
