//! 概念目录：翻译协作方与显示名 / 规范名解析

pub mod resolver;
pub mod translate;

pub use resolver::{ConceptResolver, CANONICAL_LANGUAGE};
pub use translate::{
    detect_source_language, language_name, LlmTranslator, PassthroughTranslator, TextTranslator,
    Translator,
};
