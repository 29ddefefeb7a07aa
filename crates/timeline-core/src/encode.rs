use timeline_backend::Vocabulary;

/// Filler placed in front of short sequences.
pub const PAD_ID: u32 = 0;

/// Left-pads `ids` with [`PAD_ID`] to exactly `len`, dropping the oldest ids
/// when there are too many.
pub fn pad_pre(ids: &[u32], len: usize) -> Vec<u32> {
    if ids.len() >= len {
        return ids[ids.len() - len..].to_vec();
    }
    let mut out = vec![PAD_ID; len - ids.len()];
    out.extend_from_slice(ids);
    out
}

/// Encodes the whole history into the `max_sequence_len - 1` ids the model
/// was trained on.
pub fn encode_history(vocab: &Vocabulary, history: &str, max_sequence_len: usize) -> Vec<u32> {
    pad_pre(&vocab.texts_to_ids(history), max_sequence_len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_on_the_left() {
        assert_eq!(pad_pre(&[4, 5], 5), vec![0, 0, 0, 4, 5]);
    }

    #[test]
    fn keeps_most_recent_when_truncating() {
        assert_eq!(pad_pre(&[1, 2, 3, 4, 5], 3), vec![3, 4, 5]);
    }

    #[test]
    fn exact_length_is_untouched() {
        assert_eq!(pad_pre(&[7, 8], 2), vec![7, 8]);
    }

    #[test]
    fn history_encodes_to_fixed_width() {
        let vocab = Vocabulary::from_words(Some("<oov>"), &["admission", "triage"]);
        let seq = encode_history(&vocab, "admission unknown triage", 6);
        assert_eq!(seq, vec![0, 0, 2, 1, 3]);
    }

    #[test]
    fn long_history_keeps_tail_context() {
        let vocab = Vocabulary::from_words(None, &["a", "b", "c"]);
        let history = "a b c a b c a b c c";
        let seq = encode_history(&vocab, history, 4);
        assert_eq!(seq, vec![2, 3, 3]);
    }
}
