//! Pinyin transliteration for region keys.

use common::Transliterator;
use pinyin::ToPinyin;

/// Concatenated toneless pinyin of the Han characters in a name.
///
/// Non-Han characters are dropped, so a purely latin input maps to an empty
/// key and the caller falls back to the input itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinyinTransliterator;

impl Transliterator for PinyinTransliterator {
    fn ascii_key(&self, name: &str) -> String {
        name.to_pinyin().flatten().map(|p| p.plain()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_han_names_become_plain_pinyin() {
        let t = PinyinTransliterator;
        assert_eq!(t.ascii_key("北京"), "beijing");
        assert_eq!(t.ascii_key("海淀"), "haidian");
    }

    #[test]
    fn test_latin_input_is_empty() {
        assert_eq!(PinyinTransliterator.ascii_key("beijing"), "");
    }
}
