use std::collections::VecDeque;

/// How many recently emitted events are barred from being picked again.
pub const RECENT_WINDOW: usize = 3;

/// FIFO of the last [`RECENT_WINDOW`] events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentWindow {
    events: VecDeque<String>,
}

impl RecentWindow {
    pub fn new() -> Self {
        Self { events: VecDeque::with_capacity(RECENT_WINDOW) }
    }

    /// Seeds the window with the trailing whitespace-separated tokens of `text`.
    pub fn from_seed(text: &str) -> Self {
        let mut window = Self::new();
        for token in text.split_whitespace() {
            window.push(token.to_string());
        }
        window
    }

    pub fn push(&mut self, event: String) {
        if self.events.len() == RECENT_WINDOW {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    pub fn len(&self) -> usize { self.events.len() }

    pub fn is_empty(&self) -> bool { self.events.is_empty() }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(String::as_str)
    }
}
