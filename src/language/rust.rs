//! Rust language definition

use super::{ChunkKind, LanguageDef};

/// Tree-sitter query for extracting Rust code chunks
const CHUNK_QUERY: &str = r#"
(function_item
  name: (identifier) @name) @function

(impl_item
  body: (declaration_list
    (function_item
      name: (identifier) @name) @method))

(struct_item
  name: (type_identifier) @name) @struct

(enum_item
  name: (type_identifier) @name) @enum

(trait_item
  name: (type_identifier) @name) @trait

(const_item
  name: (identifier) @name) @constant

(static_item
  name: (identifier) @name) @constant
"#;

/// Mapping from capture names to chunk kinds
const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function", ChunkKind::Function),
    ("method", ChunkKind::Method),
    ("struct", ChunkKind::Struct),
    ("enum", ChunkKind::Enum),
    ("trait", ChunkKind::Trait),
    ("constant", ChunkKind::Constant),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "rust",
    grammar: Some(|| tree_sitter_rust::LANGUAGE.into()),
    extensions: &["rs"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
