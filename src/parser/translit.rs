use std::collections::HashMap;

/// Cyrillic → Latin slug converter.
///
/// Reading rules follow the BGN/PCGN romanization of Russian, with `е`/`ё`
/// read as `ye` at the start of a word and after vowels or soft/hard signs.
/// The Latin text is then folded to ASCII and everything outside `[a-z-]` is
/// dropped, so the result can be empty.
///
/// Built once per run and passed to whoever needs slugs.
pub struct Transliterator {
    table: HashMap<char, &'static str>,
}

const LETTERS: &[(char, &str)] = &[
    ('а', "a"),
    ('б', "b"),
    ('в', "v"),
    ('г', "g"),
    ('д', "d"),
    ('е', "e"),
    ('ё', "ë"),
    ('ж', "zh"),
    ('з', "z"),
    ('и', "i"),
    ('й', "y"),
    ('к', "k"),
    ('л', "l"),
    ('м', "m"),
    ('н', "n"),
    ('о', "o"),
    ('п', "p"),
    ('р', "r"),
    ('с', "s"),
    ('т', "t"),
    ('у', "u"),
    ('ф', "f"),
    ('х', "kh"),
    ('ц', "ts"),
    ('ч', "ch"),
    ('ш', "sh"),
    ('щ', "shch"),
    ('ъ', "ʺ"),
    ('ы', "y"),
    ('ь', "ʹ"),
    ('э', "e"),
    ('ю', "yu"),
    ('я', "ya"),
    // Ukrainian and Belarusian
    ('і', "i"),
    ('ї', "yi"),
    ('є', "ye"),
    ('ґ', "g"),
    ('ў', "w"),
];

const VOWELS: &str = "аеёиоуыэюяіїє";

impl Transliterator {
    pub fn new() -> Self {
        Transliterator {
            table: LETTERS.iter().copied().collect(),
        }
    }

    /// Romanize `text`, keeping everything that is not Cyrillic as is.
    pub fn romanize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut prev: Option<char> = None;

        for ch in text.chars() {
            let lower = ch.to_lowercase().next().unwrap_or(ch);
            let Some(&latin) = self.table.get(&lower) else {
                out.push(ch);
                prev = Some(lower);
                continue;
            };

            let latin = match lower {
                'е' if iotated(prev) => "ye",
                'ё' if iotated(prev) => "yë",
                _ => latin,
            };

            if ch.is_uppercase() {
                let mut chars = latin.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
            } else {
                out.push_str(latin);
            }
            prev = Some(lower);
        }

        out
    }

    /// Full slug pipeline: romanize, fold to ASCII, keep `[a-z-]`.
    pub fn slug(&self, text: &str) -> String {
        let latin = self.romanize(text);
        deunicode::deunicode(&latin)
            .chars()
            .filter(|c| c.is_ascii_lowercase() || *c == '-')
            .collect()
    }
}

impl Default for Transliterator {
    fn default() -> Self {
        Self::new()
    }
}

fn iotated(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => VOWELS.contains(c) || matches!(c, 'ъ' | 'ь' | 'й') || !c.is_alphabetic(),
    }
}
