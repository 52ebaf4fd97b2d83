// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The rendering seam.
//!
//! A session never draws anything itself. After every consumer evaluation it
//! hands a [`Frame`] to a [`Renderer`]; [`TextRenderer`] is the small
//! recording implementation tests and demos observe.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::Display;

use crate::event_loop::VirtualTime;

/// What the consumer shows after an evaluation.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a, V, E> {
    /// The read is suspended; show the fallback.
    Fallback,
    /// The read produced a value.
    Ready(&'a V),
    /// The read failed.
    Failed(&'a E),
}

impl<V, E> Clone for Frame<'_, V, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V, E> Copy for Frame<'_, V, E> {}

/// Receives frames from a session.
pub trait Renderer<V, E> {
    /// Shows `frame`, produced at virtual time `at`.
    fn render(&mut self, frame: Frame<'_, V, E>, at: VirtualTime);
}

/// Records rendered frames as text.
///
/// Values and errors are rendered with [`Display`]. Consecutive identical
/// frames are kept in the history, so the history length is the number of
/// renders.
#[derive(Clone, Debug)]
pub struct TextRenderer {
    fallback: String,
    text: String,
    showing_fallback: bool,
    history: Vec<(VirtualTime, String)>,
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRenderer {
    /// Creates a renderer whose fallback text is `"Loading..."`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fallback("Loading...")
    }

    /// Creates a renderer with a custom fallback text.
    #[must_use]
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            text: String::new(),
            showing_fallback: false,
            history: Vec::new(),
        }
    }

    /// Text of the most recent frame; empty before the first render.
    #[must_use]
    pub fn text_content(&self) -> &str {
        &self.text
    }

    /// Every rendered frame with its render time.
    ///
    /// The history grows with every render until
    /// [`clear_history`](Self::clear_history) is called.
    #[must_use]
    pub fn history(&self) -> &[(VirtualTime, String)] {
        &self.history
    }

    /// Forgets the recorded history. The current text is kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Time of the first render showing `text`, if any.
    #[must_use]
    pub fn first_shown(&self, text: &str) -> Option<VirtualTime> {
        self.history
            .iter()
            .find(|(_, shown)| shown == text)
            .map(|(at, _)| *at)
    }

    /// Returns `true` while the most recent frame is the fallback.
    #[must_use]
    pub fn is_showing_fallback(&self) -> bool {
        self.showing_fallback
    }
}

impl<V: Display, E: Display> Renderer<V, E> for TextRenderer {
    fn render(&mut self, frame: Frame<'_, V, E>, at: VirtualTime) {
        self.text = match frame {
            Frame::Fallback => self.fallback.clone(),
            Frame::Ready(value) => value.to_string(),
            Frame::Failed(error) => error.to_string(),
        };
        self.showing_fallback = matches!(frame, Frame::Fallback);
        self.history.push((at, self.text.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show(renderer: &mut TextRenderer, frame: Frame<'_, &str, &str>, ms: u64) {
        renderer.render(frame, VirtualTime::from_millis(ms));
    }

    #[test]
    fn records_text_and_history() {
        let mut renderer = TextRenderer::new();
        assert_eq!(renderer.text_content(), "");
        assert!(!renderer.is_showing_fallback());

        show(&mut renderer, Frame::Fallback, 0);
        assert!(renderer.is_showing_fallback());
        show(&mut renderer, Frame::Ready(&"AB"), 10);
        show(&mut renderer, Frame::Failed(&"offline"), 12);

        assert_eq!(renderer.text_content(), "offline");
        assert_eq!(renderer.history().len(), 3);
        assert_eq!(renderer.first_shown("AB"), Some(VirtualTime::from_millis(10)));
        assert_eq!(renderer.first_shown("A"), None);
    }

    #[test]
    fn clearing_history_keeps_current_text() {
        let mut renderer = TextRenderer::new();
        show(&mut renderer, Frame::Fallback, 0);
        show(&mut renderer, Frame::Ready(&"AB"), 10);
        renderer.clear_history();

        assert!(renderer.history().is_empty());
        assert_eq!(renderer.text_content(), "AB");
        assert!(!renderer.is_showing_fallback());
        show(&mut renderer, Frame::Ready(&"AB"), 20);
        assert_eq!(renderer.first_shown("AB"), Some(VirtualTime::from_millis(20)));
    }

        #[test]
    fn custom_fallback() {
        let mut renderer = TextRenderer::with_fallback("Loading count...");
        show(&mut renderer, Frame::Fallback, 0);
        assert_eq!(renderer.text_content(), "Loading count...");
    }
}
