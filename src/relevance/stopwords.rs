//! Prepositions and conjunctions ignored in queries (English and Spanish).

pub const STOP_WORDS: &[&str] = &[
    // Spanish
    "a", "ante", "bajo", "con", "contra", "de", "desde", "durante", "en", "entre", "hacia",
    "hasta", "mediante", "para", "por", "según", "sin", "sobre", "tras", "y", "e", "ni", "que",
    "o", "u", "pero", "mas", "aunque", "sino", "porque", "pues", "ya", "si",
    // English
    "the", "of", "and", "to", "in", "for", "with", "on", "at", "from", "by", "about", "as",
    "into", "like", "through", "after", "over", "between", "out", "against", "during",
    "without", "before", "under", "around", "among", "or", "but", "yet", "so", "nor", "if",
    "while", "because", "though", "although", "since", "unless", "than", "whether",
];

/// `word` must already be lowercase.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}
