//! Readability analysis: plain text in, flat metrics out
//!
//! Pure functions, no I/O. Syllable counting uses a vowel-group heuristic
//! with a silent-e adjustment; the formula constants are the published ones.

use shared::model::ReadabilityMetrics;

/// Computes all readability metrics for cleaned article text.
pub fn analyze(text: &str) -> ReadabilityMetrics {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len() as u32;
    let sentence_count = count_sentences(text);
    let char_count: u32 = words
        .iter()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).count() as u32)
        .sum();

    let mut syllable_count: u32 = 0;
    let mut complex_words: u32 = 0;
    for word in &words {
        let syllables = count_syllables(word);
        syllable_count += syllables;
        if syllables >= 3 {
            complex_words += 1;
        }
    }

    if word_count == 0 || sentence_count == 0 {
        return ReadabilityMetrics::default();
    }

    let words_f = word_count as f64;
    let sentences_f = sentence_count as f64;
    let syllables_f = syllable_count as f64;

    let avg_words_per_sentence = words_f / sentences_f;
    let avg_syllables_per_word = syllables_f / words_f;

    let flesch_reading_ease =
        206.835 - 1.015 * avg_words_per_sentence - 84.6 * avg_syllables_per_word;
    let flesch_kincaid_grade =
        0.39 * avg_words_per_sentence + 11.8 * avg_syllables_per_word - 15.59;
    let smog_index = 1.0430 * (complex_words as f64 * 30.0 / sentences_f).sqrt() + 3.1291;
    let automated_readability_index =
        4.71 * (char_count as f64 / words_f) + 0.5 * avg_words_per_sentence - 21.43;

    ReadabilityMetrics {
        words: word_count,
        sentences: sentence_count,
        syllables: syllable_count,
        complex_words,
        avg_words_per_sentence,
        avg_syllables_per_word,
        flesch_reading_ease,
        flesch_kincaid_grade,
        smog_index,
        automated_readability_index,
    }
}

/// Counts sentences by terminal punctuation runs; a trailing fragment without
/// punctuation still counts as one sentence.
fn count_sentences(text: &str) -> u32 {
    let mut count = 0u32;
    let mut in_terminal = false;
    let mut saw_content = false;

    for c in text.chars() {
        match c {
            '.' | '!' | '?' => {
                if !in_terminal && saw_content {
                    count += 1;
                }
                in_terminal = true;
                saw_content = false;
            }
            c if c.is_alphanumeric() => {
                in_terminal = false;
                saw_content = true;
            }
            _ => {}
        }
    }

    if saw_content {
        count += 1;
    }
    count
}

/// Vowel-group syllable heuristic with a silent-e adjustment. Every word
/// counts at least one syllable.
fn count_syllables(word: &str) -> u32 {
    let lowered: String = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    if lowered.is_empty() {
        return 0;
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count = 0u32;
    let mut previous_was_vowel = false;

    for c in lowered.chars() {
        let vowel = is_vowel(c);
        if vowel && !previous_was_vowel {
            count += 1;
        }
        previous_was_vowel = vowel;
    }

    if lowered.ends_with('e') && !lowered.ends_with("le") && count > 1 {
        count -= 1;
    }

    count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_all_zero() {
        let metrics = analyze("");
        assert_eq!(metrics.words, 0);
        assert_eq!(metrics.sentences, 0);
        assert_eq!(metrics.flesch_reading_ease, 0.0);
    }

    #[test]
    fn test_sentence_counting() {
        assert_eq!(count_sentences("One. Two! Three?"), 3);
        assert_eq!(count_sentences("No terminal punctuation"), 1);
        assert_eq!(count_sentences("Ellipsis... still one sentence."), 2);
    }

    #[test]
    fn test_syllable_counting() {
        assert_eq!(count_syllables("cat"), 1);
        assert_eq!(count_syllables("table"), 2);
        assert_eq!(count_syllables("readability"), 5);
        // Silent e
        assert_eq!(count_syllables("move"), 1);
        // Every word has at least one syllable
        assert_eq!(count_syllables("tsk"), 1);
    }

    #[test]
    fn test_simple_text_scores_easy() {
        let metrics = analyze("The cat sat on the mat. The dog ran to the park.");
        assert_eq!(metrics.sentences, 2);
        assert_eq!(metrics.words, 12);
        // Short monosyllabic sentences score high on Flesch reading ease
        assert!(metrics.flesch_reading_ease > 90.0);
        assert!(metrics.flesch_kincaid_grade < 3.0);
    }

    #[test]
    fn test_complex_text_scores_harder() {
        let easy = analyze("The cat sat on the mat. The dog ran fast.");
        let hard = analyze(
            "Institutional accountability necessitates comprehensive regulatory \
             oversight mechanisms throughout intergovernmental organizations.",
        );
        assert!(hard.flesch_reading_ease < easy.flesch_reading_ease);
        assert!(hard.flesch_kincaid_grade > easy.flesch_kincaid_grade);
        assert!(hard.complex_words > 0);
    }
}
