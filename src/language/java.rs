//! Java language definition

use super::{ChunkKind, LanguageDef};

const CHUNK_QUERY: &str = r#"
(class_declaration
  name: (identifier) @name) @class

(method_declaration
  name: (identifier) @name) @method

(interface_declaration
  name: (identifier) @name) @interface

(enum_declaration
  name: (identifier) @name) @enum
"#;

const KIND_MAP: &[(&str, ChunkKind)] = &[
    ("class", ChunkKind::Class),
    ("method", ChunkKind::Method),
    ("interface", ChunkKind::Interface),
    ("enum", ChunkKind::Enum),
];

static DEFINITION: LanguageDef = LanguageDef {
    name: "java",
    grammar: Some(|| tree_sitter_java::LANGUAGE.into()),
    extensions: &["java"],
    chunk_query: CHUNK_QUERY,
    kind_map: KIND_MAP,
};

pub(super) fn definition() -> &'static LanguageDef {
    &DEFINITION
}
