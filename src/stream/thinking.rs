use smallvec::SmallVec;

use crate::config::ThinkingDelivery;

use super::classify::ContentFragment;

/// Opens a thinking section in the content channel.
pub const THINK_OPEN_DELIMITER: &str = "<think>\n";
/// Closes a thinking section in the content channel.
pub const THINK_CLOSE_DELIMITER: &str = "\n</think>\n\n";

/// One downstream delta produced by the thinking channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaFragment {
    /// Goes into `delta.content`.
    Content(String),
    /// Goes into `delta.reasoning`.
    Reasoning(String),
}

/// Where a thought came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThoughtOrigin {
    Upstream,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingState {
    Closed,
    OpenSynthetic,
    OpenReal,
}

pub type Emissions = SmallVec<[DeltaFragment; 3]>;

/// Per-stream state machine deciding where thinking delimiters go.
///
/// Content delivery opens at most once and closes at most once per stream.
/// Metadata delivery never touches the state.
#[derive(Debug)]
pub struct ThinkingChannel {
    delivery: ThinkingDelivery,
    state: ThinkingState,
    opened_once: bool,
}

impl ThinkingChannel {
    #[must_use]
    pub fn new(delivery: ThinkingDelivery) -> Self {
        Self {
            delivery,
            state: ThinkingState::Closed,
            opened_once: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ThinkingState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state != ThinkingState::Closed
    }

    pub fn on_fragment(&mut self, fragment: ContentFragment, out: &mut Emissions) {
        match fragment {
            ContentFragment::Thought(text) => self.on_thought(text, ThoughtOrigin::Upstream, out),
            ContentFragment::Text(text) => self.on_text(text, out),
        }
    }

    pub fn on_thought(&mut self, text: String, origin: ThoughtOrigin, out: &mut Emissions) {
        if self.delivery == ThinkingDelivery::Metadata {
            out.push(DeltaFragment::Reasoning(text));
            return;
        }
        if self.state == ThinkingState::Closed && !self.opened_once {
            self.opened_once = true;
            self.state = match origin {
                ThoughtOrigin::Upstream => ThinkingState::OpenReal,
                ThoughtOrigin::Synthetic => ThinkingState::OpenSynthetic,
            };
            out.push(DeltaFragment::Content(THINK_OPEN_DELIMITER.to_string()));
        }
        // Thoughts after the section closed flow through as plain content.
        out.push(DeltaFragment::Content(text));
    }

    pub fn on_text(&mut self, text: String, out: &mut Emissions) {
        self.close_into(out);
        out.push(DeltaFragment::Content(text));
    }

    /// Close an open section without content following it, e.g. before a
    /// fallback notice or an inline error.
    pub fn close_into(&mut self, out: &mut Emissions) {
        if self.is_open() {
            self.state = ThinkingState::Closed;
            out.push(DeltaFragment::Content(THINK_CLOSE_DELIMITER.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(delivery: ThinkingDelivery, fragments: Vec<ContentFragment>) -> Vec<DeltaFragment> {
        let mut channel = ThinkingChannel::new(delivery);
        let mut out = Emissions::new();
        for fragment in fragments {
            channel.on_fragment(fragment, &mut out);
        }
        out.into_vec()
    }

    fn count(out: &[DeltaFragment], needle: &str) -> usize {
        out.iter()
            .filter(|d| matches!(d, DeltaFragment::Content(c) if c == needle))
            .count()
    }

    fn thought(s: &str) -> ContentFragment {
        ContentFragment::Thought(s.into())
    }

    fn text(s: &str) -> ContentFragment {
        ContentFragment::Text(s.into())
    }

    #[test]
    fn test_content_delivery_wraps_thoughts_once() {
        let out = run(
            ThinkingDelivery::Content,
            vec![thought("a"), thought("b"), text("x"), text("y")],
        );
        assert_eq!(
            out,
            vec![
                DeltaFragment::Content(THINK_OPEN_DELIMITER.into()),
                DeltaFragment::Content("a".into()),
                DeltaFragment::Content("b".into()),
                DeltaFragment::Content(THINK_CLOSE_DELIMITER.into()),
                DeltaFragment::Content("x".into()),
                DeltaFragment::Content("y".into()),
            ]
        );
    }

    #[test]
    fn test_delimiters_bounded_for_interleaved_input() {
        let out = run(
            ThinkingDelivery::Content,
            vec![
                thought("a"),
                text("x"),
                thought("b"),
                text("y"),
                thought("c"),
            ],
        );
        assert_eq!(count(&out, THINK_OPEN_DELIMITER), 1);
        assert_eq!(count(&out, THINK_CLOSE_DELIMITER), 1);
        assert_eq!(out.last(), Some(&DeltaFragment::Content("c".into())));
    }

    #[test]
    fn test_unterminated_section_not_force_closed() {
        let out = run(ThinkingDelivery::Content, vec![thought("a")]);
        assert_eq!(count(&out, THINK_CLOSE_DELIMITER), 0);
    }

    #[test]
    fn test_text_only_has_no_delimiters() {
        let out = run(ThinkingDelivery::Content, vec![text("x")]);
        assert_eq!(out, vec![DeltaFragment::Content("x".into())]);
    }

    #[test]
    fn test_metadata_delivery_bypasses_state() {
        let mut channel = ThinkingChannel::new(ThinkingDelivery::Metadata);
        let mut out = Emissions::new();
        channel.on_fragment(thought("a"), &mut out);
        assert_eq!(channel.state(), ThinkingState::Closed);
        channel.on_fragment(text("x"), &mut out);
        assert_eq!(
            out.into_vec(),
            vec![
                DeltaFragment::Reasoning("a".into()),
                DeltaFragment::Content("x".into()),
            ]
        );
    }

    #[test]
    fn test_synthetic_then_real_shares_one_section() {
        let mut channel = ThinkingChannel::new(ThinkingDelivery::Content);
        let mut out = Emissions::new();
        channel.on_thought("s".into(), ThoughtOrigin::Synthetic, &mut out);
        assert_eq!(channel.state(), ThinkingState::OpenSynthetic);
        channel.on_thought("r".into(), ThoughtOrigin::Upstream, &mut out);
        channel.on_text("x".into(), &mut out);
        assert_eq!(channel.state(), ThinkingState::Closed);
        let out = out.into_vec();
        assert_eq!(count(&out, THINK_OPEN_DELIMITER), 1);
        assert_eq!(count(&out, THINK_CLOSE_DELIMITER), 1);
    }

    #[test]
    fn test_close_into_is_idempotent() {
        let mut channel = ThinkingChannel::new(ThinkingDelivery::Content);
        let mut out = Emissions::new();
        channel.close_into(&mut out);
        assert!(out.is_empty());
        channel.on_thought("a".into(), ThoughtOrigin::Upstream, &mut out);
        channel.close_into(&mut out);
        channel.close_into(&mut out);
        assert_eq!(count(&out, THINK_CLOSE_DELIMITER), 1);
    }
}
