//! Inference backend seam and the vocabulary shared by every backend.

use timeline_common::Result;

pub mod vocab;

pub use vocab::Vocabulary;

/// A pre-trained next-event model.
///
/// Implementations are shared across concurrent requests, so `predict` must
/// not mutate observable state.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every distribution returned by [`InferenceBackend::predict`].
    fn vocab_size(&self) -> usize;

    /// Maps a left-padded id sequence to a probability per vocabulary id.
    fn predict(&self, sequence: &[u32]) -> Result<Vec<f32>>;
}

#[cfg(feature = "mock")]
pub mod mock {
    use super::*;

    /// Deterministic stand-in for a trained model.
    ///
    /// Ignores its input and scores ids along a fixed ranking with Zipf-like
    /// weights. Ids missing from the ranking get zero mass.
    #[derive(Debug, Clone)]
    pub struct MockBackend {
        vocab_size: usize,
        ranking: Vec<u32>,
    }

    impl MockBackend {
        /// Keras tokenizers number words by descending frequency, so ranking by
        /// id gives a unigram prior.
        pub fn frequency_prior(vocab_size: usize) -> Self {
            Self { vocab_size, ranking: (1..vocab_size as u32).collect() }
        }

        pub fn ranked(vocab_size: usize, ranking: Vec<u32>) -> Self {
            Self { vocab_size, ranking }
        }
    }

    impl InferenceBackend for MockBackend {
        fn name(&self) -> &str { "mock" }

        fn vocab_size(&self) -> usize { self.vocab_size }

        fn predict(&self, _sequence: &[u32]) -> Result<Vec<f32>> {
            let mut probs = vec![0.0_f32; self.vocab_size];
            let mut rank = 0;
            for &id in &self.ranking {
                let Some(slot) = probs.get_mut(id as usize) else { continue };
                rank += 1;
                *slot = 1.0 / rank as f32;
            }
            let sum: f32 = probs.iter().sum();
            if sum > 0.0 {
                probs.iter_mut().for_each(|p| *p /= sum);
            }
            Ok(probs)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ranking_order_is_respected() {
            let backend = MockBackend::ranked(5, vec![3, 1, 4]);
            let probs = backend.predict(&[0, 0, 1]).unwrap();
            assert_eq!(probs.len(), 5);
            assert!(probs[3] > probs[1]);
            assert!(probs[1] > probs[4]);
            assert_eq!(probs[0], 0.0);
            assert_eq!(probs[2], 0.0);
            assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }

        #[test]
        fn out_of_range_ids_are_skipped() {
            let backend = MockBackend::ranked(3, vec![7, 2]);
            let probs = backend.predict(&[]).unwrap();
            assert!((probs[2] - 1.0).abs() < 1e-6);
        }

        #[test]
        fn frequency_prior_prefers_low_ids() {
            let probs = MockBackend::frequency_prior(4).predict(&[]).unwrap();
            assert!(probs[1] > probs[2] && probs[2] > probs[3]);
            assert_eq!(probs[0], 0.0);
        }
    }
}
