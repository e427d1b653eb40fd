//! C language definition

use super::{ChunkKind, LanguageDef};

const CHUNK_QUERY: &str = r#"
(function_definition
  declarator: (function_declarator
    declarator: (identifier) @name)) @function

(struct_specifier
  name: (type_identifier) @name
  body: (field_declaration_list)) @struct

(enum_specifier
  name: (type_identifier) @name
  body: (enumerator_list)) @enum
"#;

const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function", ChunkKind::Function),
    ("struct", ChunkKind::Struct),
    ("enum", ChunkKind::Enum),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "c",
    grammar: Some(|| tree_sitter_c::LANGUAGE.into()),
    extensions: &["c", "h"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
