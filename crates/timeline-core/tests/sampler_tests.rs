use rand::prelude::*;
use timeline_backend::Vocabulary;
use timeline_core::sampler::{apply_temperature, rank_descending, select_event};
use timeline_core::window::RecentWindow;

fn random_distribution(rng: &mut StdRng, len: usize) -> Vec<f32> {
    let raw: Vec<f32> = (0..len).map(|_| if rng.gen_bool(0.2) { 0.0 } else { rng.gen::<f32>() }).collect();
    let sum: f32 = raw.iter().sum::<f32>().max(1e-6);
    raw.iter().map(|p| p / sum).collect()
}

#[test]
fn transform_sums_to_one_for_any_positive_temperature() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let len = rng.gen_range(1..64);
        let probs = random_distribution(&mut rng, len);
        let t = rng.gen_range(0.05..5.0);
        let out = apply_temperature(&probs, t);
        assert_eq!(out.len(), probs.len());
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-6, "t={t}");
        assert!(out.iter().all(|p| *p >= 0.0));
    }
}

#[test]
fn unit_temperature_preserves_ranking() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..100 {
        // distinct values so ranking is unambiguous
        let mut probs: Vec<f32> = (1..=20).map(|i| i as f32).collect();
        probs.shuffle(&mut rng);
        let sum: f32 = probs.iter().sum();
        let probs: Vec<f32> = probs.iter().map(|p| p / sum).collect();
        let before = rank_descending(&probs.iter().map(|&p| p as f64).collect::<Vec<_>>());
        let after = rank_descending(&apply_temperature(&probs, 1.0));
        assert_eq!(before, after);
    }
}

#[test]
fn selection_avoids_window_unless_everything_is_excluded() {
    let words = ["admission", "triage", "labwork", "imaging", "consult", "surgery"];
    let vocab = Vocabulary::from_words(None, &words);
    let mut rng = StdRng::seed_from_u64(1234);
    for _ in 0..300 {
        let probs = random_distribution(&mut rng, words.len() + 1);
        let dist = apply_temperature(&probs, rng.gen_range(0.1..3.0));
        let mut window = RecentWindow::new();
        for _ in 0..rng.gen_range(0..4) {
            window.push(words.choose(&mut rng).unwrap().to_string());
        }
        let picked = select_event(&dist, &vocab, &window).expect("some word is always free");
        assert!(!window.contains(picked));

        // every other candidate that outranks the pick must be windowed
        let ranking = rank_descending(&dist);
        for id in ranking {
            match vocab.word(id as u32) {
                Some(w) if w == picked => break,
                Some(w) => assert!(window.contains(w)),
                None => {}
            }
        }
    }
}

#[test]
fn fully_windowed_vocabulary_returns_argmax() {
    let vocab = Vocabulary::from_words(None, &["a", "b"]);
    let window = RecentWindow::from_seed("a b");
    let dist = apply_temperature(&[0.0, 0.3, 0.7], 1.0);
    assert_eq!(select_event(&dist, &vocab, &window), Some("b"));
}
